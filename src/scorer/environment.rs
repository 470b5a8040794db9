use std::collections::BTreeMap;

use crate::aggregate::TeamEnvironment;
use crate::config::{environment_weights, LEAGUE_SIZE};

use super::rank_ascending;

/// `100 * (rank - 1) / 29`, with `rank` clamped into `1..=30`.
pub fn normalized(rank: u8) -> f64 {
    let rank = rank.clamp(1, LEAGUE_SIZE);
    100.0 * f64::from(rank - 1) / f64::from(LEAGUE_SIZE - 1)
}

/// Blend of the opponent's defensive-rating rank and pace rank, in `[0, 100]`.
/// Higher means a softer, faster game for the player.
pub fn score(def_rating_rank: u8, pace_rank: u8) -> f64 {
    let raw = environment_weights::DEFENSIVE_RATING * normalized(def_rating_rank)
        + environment_weights::PACE * normalized(pace_rank);
    (raw * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeamEnvironmentRank {
    /// 1 = lowest defensive rating.
    pub def_rating_rank: u8,
    /// 1 = slowest.
    pub pace_rank: u8,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentRanks {
    teams: BTreeMap<String, TeamEnvironmentRank>,
}

impl EnvironmentRanks {
    pub fn get(&self, team: &str) -> Option<&TeamEnvironmentRank> {
        self.teams.get(team)
    }

    /// None when the team is missing either metric.
    pub fn score(&self, team: &str) -> Option<f64> {
        self.get(team).map(|r| r.score)
    }
}

/// Rank teams by mean defensive rating and mean pace. Teams missing either
/// metric are left out of both pools.
pub fn rank_environment(metrics: &BTreeMap<String, TeamEnvironment>) -> EnvironmentRanks {
    let complete: Vec<(&str, f64, f64)> = metrics
        .iter()
        .filter_map(|(team, m)| Some((team.as_str(), m.def_rating?, m.pace?)))
        .collect();

    let def_ranks: BTreeMap<&str, u8> =
        rank_ascending(complete.iter().map(|(t, d, _)| (*t, *d))).into_iter().collect();
    let pace_ranks: BTreeMap<&str, u8> =
        rank_ascending(complete.iter().map(|(t, _, p)| (*t, *p))).into_iter().collect();

    let teams = complete
        .iter()
        .map(|(team, _, _)| {
            let def_rating_rank = def_ranks[team];
            let pace_rank = pace_ranks[team];
            (
                team.to_string(),
                TeamEnvironmentRank {
                    def_rating_rank,
                    pace_rank,
                    score: score(def_rating_rank, pace_rank),
                },
            )
        })
        .collect();

    EnvironmentRanks { teams }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries() {
        assert_eq!(score(1, 1), 0.0);
        assert_eq!(score(30, 30), 100.0);
        assert_eq!(score(30, 1), 60.0);
        assert_eq!(score(1, 30), 40.0);
        assert_eq!(score(0, 0), 0.0);
        assert_eq!(score(31, 200), 100.0);
    }

    #[test]
    fn strictly_increasing_in_each_input() {
        for fixed in 1..=30u8 {
            for r in 1..30u8 {
                assert!(score(r + 1, fixed) > score(r, fixed), "def {r} pace {fixed}");
                assert!(score(fixed, r + 1) > score(fixed, r), "def {fixed} pace {r}");
            }
        }
    }

    #[test]
    fn ranks_ascending_metrics() {
        let mut metrics = BTreeMap::new();
        let env = |d: f64, p: f64| TeamEnvironment { def_rating: Some(d), pace: Some(p), games: 10 };
        metrics.insert("BOS".to_string(), env(108.0, 99.0));
        metrics.insert("NYK".to_string(), env(112.0, 97.0));
        metrics.insert("MIA".to_string(), env(108.0, 101.0));
        metrics.insert(
            "UTA".to_string(),
            TeamEnvironment { def_rating: Some(120.0), pace: None, games: 10 },
        );

        let ranks = rank_environment(&metrics);
        let bos = ranks.get("BOS").unwrap();
        assert_eq!((bos.def_rating_rank, bos.pace_rank), (1, 2));
        let mia = ranks.get("MIA").unwrap();
        assert_eq!((mia.def_rating_rank, mia.pace_rank), (2, 3));
        let nyk = ranks.get("NYK").unwrap();
        assert_eq!((nyk.def_rating_rank, nyk.pace_rank), (3, 1));
        assert_eq!(nyk.score, score(3, 1));
        assert!(ranks.score("UTA").is_none());
        assert!(ranks.score("LAL").is_none());
    }
}
