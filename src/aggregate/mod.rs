pub mod window;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::types::{PositionGroup, Stat, Window, STAT_COUNT};

pub use window::aggregate;

// ---------------------------------------------------------------------------
// Aggregate types
// ---------------------------------------------------------------------------

/// What one team allowed to one position group for one statistic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TeamDefenseAggregate {
    /// Mean per-game total posted by opposing players of the group.
    pub allowed_average: f64,
    /// Included games in which the group appeared against the team. Zero = no data.
    pub games_counted: u32,
}

/// Per-player usage over the window.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerUsage {
    pub player_id: u64,
    pub player_name: String,
    /// Team of the player's most recent included game.
    pub team: String,
    pub position_group: PositionGroup,
    pub games_played: u32,
    pub avg_minutes: f64,
    pub stat_averages: [f64; STAT_COUNT],
    pub last_game_date: NaiveDate,
}

/// Team-level pace and defensive efficiency over the window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TeamEnvironment {
    pub def_rating: Option<f64>,
    pub pace: Option<f64>,
    pub games: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowAggregate {
    pub window: Window,
    pub as_of: NaiveDate,
    /// team → group → per-stat aggregate, indexed by `Stat::index`.
    pub defense: BTreeMap<String, BTreeMap<PositionGroup, [TeamDefenseAggregate; STAT_COUNT]>>,
    pub players: BTreeMap<u64, PlayerUsage>,
    pub environment: BTreeMap<String, TeamEnvironment>,
    /// Latest game date among the included games; None when nothing qualified.
    pub latest_game_date: Option<NaiveDate>,
    /// Rows dropped for negative or non-finite values.
    pub skipped_rows: usize,
}

impl WindowAggregate {
    /// None when the team has no qualifying games for the group.
    pub fn defense(&self, team: &str, group: PositionGroup, stat: Stat) -> Option<TeamDefenseAggregate> {
        self.defense
            .get(team)?
            .get(&group)
            .map(|cells| cells[stat.index()])
            .filter(|agg| agg.games_counted > 0)
    }

    pub fn is_empty(&self) -> bool {
        self.latest_game_date.is_none()
    }
}
