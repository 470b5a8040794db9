use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::aggregate::{aggregate, PlayerUsage};
use crate::api::health::EngineStats;
use crate::classifier::PositionClassifier;
use crate::error::EngineError;
use crate::fetcher::LogProvider;
use crate::scorer::{rank_defense, rank_environment, EnvironmentRanks, RankTable};
use crate::state::RawLogStore;
use crate::types::{
    as_of_date_for_slate, season_label_for_date, Game, InjuryTag, MatchupSnapshot, PlayerCard,
    PlayerMatchupRecord, SnapshotKey, Stat, Window, STAT_COUNT,
};

/// A freshly computed snapshot. `stale_inputs` is set when the raw logs came
/// from the fallback copy because upstream was unavailable.
#[derive(Debug, Clone)]
pub struct Computed {
    pub snapshot: MatchupSnapshot,
    pub stale_inputs: bool,
}

#[derive(Debug, Clone)]
pub struct ServedCard {
    pub card: PlayerCard,
    pub stale_inputs: bool,
}

/// Slate games → injuries → season logs → window aggregate → ranks →
/// environment → player records. Stateless apart from the shared log store.
pub struct MatchupPipeline {
    provider: Arc<dyn LogProvider>,
    logs: Arc<RawLogStore>,
    classifier: Arc<dyn PositionClassifier>,
    stats: Arc<EngineStats>,
    rotation_min_minutes: f64,
}

impl MatchupPipeline {
    pub fn new(
        provider: Arc<dyn LogProvider>,
        logs: Arc<RawLogStore>,
        classifier: Arc<dyn PositionClassifier>,
        stats: Arc<EngineStats>,
        rotation_min_minutes: f64,
    ) -> Self {
        Self {
            provider,
            logs,
            classifier,
            stats,
            rotation_min_minutes,
        }
    }

    pub fn log_store(&self) -> &Arc<RawLogStore> {
        &self.logs
    }

    pub async fn compute(&self, key: SnapshotKey) -> Result<Computed, EngineError> {
        let cutoff = as_of_date_for_slate(key.slate_date);

        let games = self
            .provider
            .fetch_slate_games(key.slate_date)
            .await
            .map_err(|e| EngineError::UpstreamFetch(format!("slate games: {e}")))?;

        let injuries = match self.provider.fetch_injury_report(key.slate_date).await {
            Ok(list) => list,
            Err(e) => {
                warn!(slate_date = %key.slate_date, "Injury fetch failed, continuing without: {e}");
                Vec::new()
            }
        };

        if games.is_empty() {
            info!(slate_date = %key.slate_date, window = %key.window, "No games on slate");
            return Ok(Computed {
                snapshot: MatchupSnapshot {
                    slate_date: key.slate_date,
                    window: key.window,
                    as_of_date: cutoff,
                    logs_through: None,
                    games,
                    injuries,
                    players: Vec::new(),
                },
                stale_inputs: false,
            });
        }

        let season = season_label_for_date(key.slate_date);
        let logs = self.logs.ensure_season_logs(&season, cutoff).await?;

        self.stats.inc_aggregation_passes();
        let agg = aggregate(
            &logs.logs.player_logs,
            &logs.logs.team_logs,
            &logs.logs.bios,
            cutoff,
            key.window,
            self.classifier.as_ref(),
        );
        if agg.is_empty() {
            return Err(EngineError::NoData(format!(
                "no {season} games on or before {cutoff}"
            )));
        }

        let ranks = rank_defense(&agg);
        let environment = rank_environment(&agg.environment);
        let players = self.assemble_players(agg.players.values(), &games, &injuries, &ranks, &environment);

        info!(
            slate_date = %key.slate_date,
            window = %key.window,
            as_of = ?agg.latest_game_date,
            games = games.len(),
            players = players.len(),
            skipped_rows = agg.skipped_rows,
            stale_inputs = logs.stale,
            "Matchups computed"
        );

        Ok(Computed {
            snapshot: MatchupSnapshot {
                slate_date: key.slate_date,
                window: key.window,
                as_of_date: agg.latest_game_date.unwrap_or(cutoff),
                logs_through: logs.logs.max_game_date,
                games,
                injuries,
                players,
            },
            stale_inputs: logs.stale,
        })
    }

    /// Per-game averages for one player over the window, counting games up
    /// to the day before `slate_date`. Built from the same season logs and
    /// aggregation as the snapshots; not cached on its own.
    pub async fn player_card(
        &self,
        player_id: u64,
        slate_date: NaiveDate,
        window: Window,
    ) -> Result<ServedCard, EngineError> {
        let cutoff = as_of_date_for_slate(slate_date);
        let season = season_label_for_date(slate_date);
        let logs = self.logs.ensure_season_logs(&season, cutoff).await?;

        self.stats.inc_aggregation_passes();
        let agg = aggregate(
            &logs.logs.player_logs,
            &logs.logs.team_logs,
            &logs.logs.bios,
            cutoff,
            window,
            self.classifier.as_ref(),
        );
        let usage = agg.players.get(&player_id).ok_or_else(|| {
            EngineError::NoData(format!("player {player_id} has no {season} games on or before {cutoff}"))
        })?;

        let avg = |stat: Stat| usage.stat_averages[stat.index()];
        Ok(ServedCard {
            card: PlayerCard {
                player_id,
                player_name: usage.player_name.clone(),
                team: usage.team.clone(),
                season,
                window,
                as_of_date: cutoff,
                last_game_date: usage.last_game_date,
                position_group: usage.position_group,
                games_played: usage.games_played,
                minutes_pg: usage.avg_minutes,
                points_pg: avg(Stat::Pts),
                rebounds_pg: avg(Stat::Reb),
                assists_pg: avg(Stat::Ast),
                threes_made_pg: avg(Stat::ThreePm),
                steals_pg: avg(Stat::Stl),
                blocks_pg: avg(Stat::Blk),
            },
            stale_inputs: logs.stale,
        })
    }

    fn assemble_players<'a>(
        &self,
        usage: impl IntoIterator<Item = &'a PlayerUsage>,
        games: &[Game],
        injuries: &[InjuryTag],
        ranks: &RankTable,
        environment: &EnvironmentRanks,
    ) -> Vec<PlayerMatchupRecord> {
        let mut opponents: HashMap<&str, &str> = HashMap::new();
        for g in games {
            opponents.insert(g.away_team.as_str(), g.home_team.as_str());
            opponents.insert(g.home_team.as_str(), g.away_team.as_str());
        }
        let injuries = InjuryLookup::new(injuries);

        let mut players: Vec<PlayerMatchupRecord> = usage
            .into_iter()
            .filter(|u| u.avg_minutes >= self.rotation_min_minutes)
            .filter_map(|u| {
                let opponent = *opponents.get(u.team.as_str())?;
                let cells = ranks.cells(opponent, u.position_group);
                let mut stat_ranks = [None; STAT_COUNT];
                let mut stat_allowed = [None; STAT_COUNT];
                let mut stat_tiers = [None; STAT_COUNT];
                for (i, cell) in cells.iter().enumerate() {
                    if let Some(c) = cell {
                        stat_ranks[i] = Some(c.rank);
                        stat_allowed[i] = Some(c.allowed_average);
                        stat_tiers[i] = Some(c.tier);
                    }
                }
                Some(PlayerMatchupRecord {
                    player_id: u.player_id,
                    player_name: u.player_name.clone(),
                    team: u.team.clone(),
                    opponent: opponent.to_string(),
                    position_group: u.position_group,
                    avg_minutes: u.avg_minutes,
                    games_played: u.games_played,
                    injury_status: injuries.status(&u.team, &u.player_name),
                    environment_score: environment.score(opponent),
                    stat_ranks,
                    stat_allowed,
                    stat_tiers,
                })
            })
            .collect();

        players.sort_by(compare_players);
        players
    }
}

/// Best matchup first: highest available rank (most generous opponent), then
/// environment score, then name and id. Missing values sort last.
fn compare_players(a: &PlayerMatchupRecord, b: &PlayerMatchupRecord) -> Ordering {
    let best = |p: &PlayerMatchupRecord| p.stat_ranks.iter().flatten().copied().max();
    let desc_opt = |x: Option<f64>, y: Option<f64>| match (x, y) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    desc_opt(best(a).map(f64::from), best(b).map(f64::from))
        .then_with(|| desc_opt(a.environment_score, b.environment_score))
        .then_with(|| a.player_name.cmp(&b.player_name))
        .then_with(|| a.player_id.cmp(&b.player_id))
}

/// Injury statuses keyed by (team, upper-cased name), with a name-only
/// fallback for players listed under a stale team.
struct InjuryLookup<'a> {
    by_team: HashMap<(&'a str, String), &'a str>,
    by_name: HashMap<String, &'a str>,
}

impl<'a> InjuryLookup<'a> {
    fn new(injuries: &'a [InjuryTag]) -> Self {
        let mut by_team = HashMap::new();
        let mut by_name = HashMap::new();
        for tag in injuries {
            let name = tag.player_name.trim().to_uppercase();
            by_team.insert((tag.team.as_str(), name.clone()), tag.status.as_str());
            by_name.entry(name).or_insert(tag.status.as_str());
        }
        Self { by_team, by_name }
    }

    fn status(&self, team: &str, player_name: &str) -> Option<String> {
        let name = player_name.trim().to_uppercase();
        self.by_team
            .get(&(team, name.clone()))
            .or_else(|| self.by_name.get(&name))
            .map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ProfileClassifier;
    use crate::testutil::{date, game, player_row, team_row, FakeProvider};
    use crate::types::{GameLogRow, PositionGroup, Tier};
    use std::time::Duration;

    fn pipeline(provider: Arc<FakeProvider>) -> (MatchupPipeline, Arc<EngineStats>) {
        let stats = Arc::new(EngineStats::new());
        let logs = RawLogStore::new(provider.clone(), None, Duration::from_secs(600));
        let p = MatchupPipeline::new(provider, logs, Arc::new(ProfileClassifier), Arc::clone(&stats), 5.0);
        (p, stats)
    }

    /// BOS and NYK guards trade games; MIA only plays ORL.
    fn seeded_provider() -> Arc<FakeProvider> {
        let d = date(2025, 11, 1);
        let mut rows = vec![
            player_row(1, "BOS", "NYK", "g1", d, 30.0),
            player_row(2, "NYK", "BOS", "g1", d, 10.0),
            player_row(3, "MIA", "ORL", "g2", d, 20.0),
            player_row(4, "ORL", "MIA", "g2", d, 25.0),
        ];
        for r in &mut rows {
            r.ast = 6.0;
        }
        let mut bench = player_row(5, "BOS", "NYK", "g1", d, 2.0);
        bench.minutes = 3.0;
        rows.push(bench);

        let provider = FakeProvider::with_rows(rows);
        provider.set_team_rows(vec![
            team_row(10, "BOS", "NYK", "g1", d, 98.0, 105.0),
            team_row(11, "NYK", "BOS", "g1", d, 98.0, 115.0),
        ]);
        provider.set_games(vec![game("s1", "BOS", "NYK")]);
        provider
    }

    #[tokio::test]
    async fn assembles_slate_players() {
        let provider = seeded_provider();
        provider.set_injuries(vec![InjuryTag {
            player_name: "player 2".to_string(),
            team: "NYK".to_string(),
            status: "Questionable".to_string(),
            comment: None,
        }]);
        let (p, stats) = pipeline(provider);

        let key = SnapshotKey::new(date(2025, 11, 3), Window::Season);
        let out = p.compute(key).await.unwrap();
        let snap = out.snapshot;

        assert!(!out.stale_inputs);
        assert_eq!(snap.as_of_date, date(2025, 11, 1));
        assert_eq!(stats.aggregation_passes(), 1);

        // MIA/ORL are not on the slate; player 5 is below the rotation cutoff.
        let ids: Vec<u64> = snap.players.iter().map(|p| p.player_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&1) && ids.contains(&2));

        let bos = snap.players.iter().find(|p| p.player_id == 1).unwrap();
        assert_eq!(bos.opponent, "NYK");
        assert_eq!(bos.position_group, PositionGroup::Guards);
        // NYK allowed 30 to guards, the most in the league among 4 teams.
        assert_eq!(bos.rank(Stat::Pts), Some(4));
        assert_eq!(bos.tier(Stat::Pts), Some(Tier::Green));
        assert_eq!(bos.stat_allowed[Stat::Pts.index()], Some(30.0));
        assert!(bos.environment_score.is_some());
        assert_eq!(bos.injury_status, None);

        let nyk = snap.players.iter().find(|p| p.player_id == 2).unwrap();
        assert_eq!(nyk.injury_status.as_deref(), Some("Questionable"));
        assert_eq!(snap.players[0].player_id, 1, "best matchup first");
    }

    #[tokio::test]
    async fn injury_failure_is_not_fatal() {
        let provider = seeded_provider();
        provider.set_injuries_failing(true);
        let (p, _) = pipeline(provider);
        let snap = p
            .compute(SnapshotKey::new(date(2025, 11, 3), Window::Last10))
            .await
            .unwrap()
            .snapshot;
        assert!(snap.injuries.is_empty());
        assert_eq!(snap.players.len(), 2);
    }

    #[tokio::test]
    async fn no_logs_before_cutoff_is_no_data() {
        let provider = seeded_provider();
        let (p, _) = pipeline(provider);
        let err = p
            .compute(SnapshotKey::new(date(2025, 10, 21), Window::Season))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoData(_)));
    }

    #[tokio::test]
    async fn empty_slate_skips_log_fetch() {
        let provider = seeded_provider();
        provider.set_games(Vec::new());
        let (p, stats) = pipeline(Arc::clone(&provider));
        let snap = p
            .compute(SnapshotKey::new(date(2025, 11, 3), Window::Season))
            .await
            .unwrap()
            .snapshot;
        assert!(snap.games.is_empty() && snap.players.is_empty());
        assert_eq!(snap.as_of_date, date(2025, 11, 2));
        assert_eq!(provider.player_fetches(), 0);
        assert_eq!(stats.aggregation_passes(), 0);
    }

    #[tokio::test]
    async fn upstream_failure_without_cache_propagates() {
        let provider = seeded_provider();
        provider.set_failing(true);
        let (p, _) = pipeline(provider);
        let err = p
            .compute(SnapshotKey::new(date(2025, 11, 3), Window::Season))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UpstreamFetch(_)));
    }

    #[tokio::test]
    async fn player_card_averages_own_games_in_window() {
        let provider = seeded_provider();
        let mut rows: Vec<GameLogRow> = (1..=12)
            .map(|day| player_row(1, "BOS", "NYK", &format!("h{day:02}"), date(2025, 12, day), day as f64))
            .collect();
        // After the cutoff for a Dec 13 slate.
        rows.push(player_row(1, "BOS", "NYK", "h13", date(2025, 12, 13), 99.0));
        provider.set_player_rows(rows);
        let (p, _) = pipeline(Arc::clone(&provider));

        let season = p.player_card(1, date(2025, 12, 13), Window::Season).await.unwrap();
        assert!(!season.stale_inputs);
        let card = season.card;
        assert_eq!(card.season, "2025-26");
        assert_eq!(card.as_of_date, date(2025, 12, 12));
        assert_eq!(card.last_game_date, date(2025, 12, 12));
        assert_eq!(card.games_played, 12);
        assert_eq!(card.points_pg, 6.5);
        assert_eq!(card.minutes_pg, 30.0);
        assert_eq!(card.rebounds_pg, 5.0);
        assert_eq!(card.team, "BOS");

        let last10 = p.player_card(1, date(2025, 12, 13), Window::Last10).await.unwrap().card;
        assert_eq!(last10.games_played, 10);
        assert_eq!(last10.points_pg, 7.5);
        assert_eq!(last10.window, Window::Last10);
        assert_eq!(provider.player_fetches(), 1);
    }

    #[tokio::test]
    async fn player_card_for_unknown_player_is_no_data() {
        let (p, _) = pipeline(seeded_provider());
        let err = p.player_card(999, date(2025, 11, 3), Window::Season).await.unwrap_err();
        assert!(matches!(err, EngineError::NoData(_)));

        let early = p.player_card(1, date(2025, 11, 1), Window::Season).await.unwrap_err();
        assert!(matches!(early, EngineError::NoData(_)));
    }

    #[test]
    fn ordering_prefers_generous_opponents() {
        let record = |id: u64, name: &str, ranks: [Option<u8>; STAT_COUNT], env: Option<f64>| PlayerMatchupRecord {
            player_id: id,
            player_name: name.to_string(),
            team: "BOS".into(),
            opponent: "NYK".into(),
            position_group: PositionGroup::Guards,
            avg_minutes: 30.0,
            games_played: 10,
            injury_status: None,
            environment_score: env,
            stat_ranks: ranks,
            stat_allowed: [None; STAT_COUNT],
            stat_tiers: [None; STAT_COUNT],
        };
        let mut players = vec![
            record(1, "Zed", [Some(3), None, None, None, None, None], Some(90.0)),
            record(2, "Amy", [None; STAT_COUNT], Some(99.0)),
            record(3, "Bob", [Some(28), Some(2), None, None, None, None], Some(10.0)),
            record(4, "Cal", [Some(28), None, None, None, None, None], Some(50.0)),
            record(5, "Cal", [Some(28), None, None, None, None, None], Some(50.0)),
        ];
        players.sort_by(compare_players);
        let order: Vec<u64> = players.iter().map(|p| p.player_id).collect();
        assert_eq!(order, vec![4, 5, 3, 1, 2]);
    }
}
