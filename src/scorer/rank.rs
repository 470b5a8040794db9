use std::collections::HashMap;

use crate::aggregate::WindowAggregate;
use crate::types::{PositionGroup, Stat, Tier, STAT_COUNT};

use super::rank_ascending;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankCell {
    /// 1 = allows the least.
    pub rank: u8,
    pub tier: Tier,
    pub allowed_average: f64,
}

/// Defensive ranks for every (team, position group, statistic) that has data.
#[derive(Debug, Clone, Default)]
pub struct RankTable {
    cells: HashMap<(String, PositionGroup), [Option<RankCell>; STAT_COUNT]>,
}

impl RankTable {
    pub fn get(&self, team: &str, group: PositionGroup, stat: Stat) -> Option<RankCell> {
        self.cells
            .get(&(team.to_string(), group))
            .and_then(|cells| cells[stat.index()])
    }

    /// All six cells for one matchup; teams without data get an all-`None` row.
    pub fn cells(&self, team: &str, group: PositionGroup) -> [Option<RankCell>; STAT_COUNT] {
        Stat::ALL.map(|stat| self.get(team, group, stat))
    }
}

/// Rank each (group, stat) pool. Only teams with at least one counted game
/// enter a pool; the rest stay unranked rather than defaulting to last.
pub fn rank_defense(agg: &WindowAggregate) -> RankTable {
    let mut table = RankTable::default();

    for group in PositionGroup::ALL {
        for stat in Stat::ALL {
            let pool = agg.defense.keys().filter_map(|team| {
                let cell = agg.defense(team, group, stat)?;
                Some((team.as_str(), cell.allowed_average))
            });

            for (team, rank) in rank_ascending(pool) {
                let allowed_average = agg.defense[team][&group][stat.index()].allowed_average;
                let row = table
                    .cells
                    .entry((team.to_string(), group))
                    .or_insert([None; STAT_COUNT]);
                row[stat.index()] = Some(RankCell {
                    rank,
                    tier: Tier::from_rank(rank),
                    allowed_average,
                });
            }
        }
    }
    table
}
