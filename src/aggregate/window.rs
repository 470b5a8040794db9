use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::{PlayerUsage, TeamDefenseAggregate, TeamEnvironment, WindowAggregate};
use crate::classifier::{PlayerBio, PlayerProfile, PositionClassifier};
use crate::config::LAST_N_GAMES;
use crate::types::{GameLogRow, PositionGroup, Stat, Window, STAT_COUNT};

/// Build the per-team, per-group allowed averages, player usage and team
/// environment metrics for one window, counting only games on or before `as_of`.
///
/// Under `Last10` each team contributes its most recent ten games, ordered by
/// `(game_date desc, game_id desc)`; players use their own ten most recent.
pub fn aggregate(
    player_logs: &[GameLogRow],
    team_logs: &[GameLogRow],
    bios: &[PlayerBio],
    as_of: NaiveDate,
    window: Window,
    classifier: &dyn PositionClassifier,
) -> WindowAggregate {
    let mut skipped_rows = 0;
    let players = usable_rows(player_logs, as_of, |r| (r.entity_id, r.game_id.clone()), &mut skipped_rows);
    let teams = usable_rows(team_logs, as_of, |r| (r.team.clone(), r.game_id.clone()), &mut skipped_rows);

    // A team's schedule comes from its own rows plus every game it shows up in
    // on the player side, so a missing team log does not hide a game.
    let mut schedule: HashMap<&str, BTreeSet<(NaiveDate, &str)>> = HashMap::new();
    for row in &teams {
        schedule.entry(row.team.as_str()).or_default().insert((row.game_date, row.game_id.as_str()));
    }
    for row in &players {
        schedule.entry(row.team.as_str()).or_default().insert((row.game_date, row.game_id.as_str()));
        schedule.entry(row.opponent_id.as_str()).or_default().insert((row.game_date, row.game_id.as_str()));
    }

    let mut latest_game_date = None;
    let included: HashMap<&str, HashSet<&str>> = schedule
        .iter()
        .map(|(team, games)| {
            let picked = window_slice(games.iter().copied(), window);
            if let Some((date, _)) = picked.first() {
                latest_game_date = latest_game_date.max(Some(*date));
            }
            (*team, picked.into_iter().map(|(_, id)| id).collect())
        })
        .collect();

    let groups = classify_players(&players, bios, classifier);
    let defense = defense_table(&players, &groups, &included);
    let environment = environment_table(&teams, &included);
    let usage = player_usage(&players, &groups, window);

    debug!(
        window = %window,
        as_of = %as_of,
        teams = included.len(),
        players = usage.len(),
        skipped_rows,
        "Window aggregated"
    );

    WindowAggregate {
        window,
        as_of,
        defense,
        players: usage,
        environment,
        latest_game_date,
        skipped_rows,
    }
}

/// Rows dated on or before `as_of` with sane values, first occurrence per key.
fn usable_rows<'a, K>(
    rows: &'a [GameLogRow],
    as_of: NaiveDate,
    key: impl Fn(&GameLogRow) -> K,
    skipped: &mut usize,
) -> Vec<&'a GameLogRow>
where
    K: std::hash::Hash + Eq,
{
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows.iter().filter(|r| r.game_date <= as_of) {
        if !is_well_formed(row) {
            *skipped += 1;
            warn!(
                entity_id = row.entity_id,
                game_id = %row.game_id,
                "Skipping malformed game log row"
            );
            continue;
        }
        if seen.insert(key(row)) {
            out.push(row);
        }
    }
    out
}

fn is_well_formed(row: &GameLogRow) -> bool {
    let sane = |v: f64| v.is_finite() && v >= 0.0;
    sane(row.minutes)
        && Stat::ALL.iter().all(|s| sane(s.value(row)))
        && row.pace_estimate.map_or(true, sane)
        && row.defensive_rating_estimate.map_or(true, sane)
        && !row.team.is_empty()
        && !row.opponent_id.is_empty()
        && !row.game_id.is_empty()
}

/// `games` must be in ascending `(date, game_id)` order. Returns newest first.
fn window_slice<'a>(
    games: impl DoubleEndedIterator<Item = (NaiveDate, &'a str)>,
    window: Window,
) -> Vec<(NaiveDate, &'a str)> {
    match window {
        Window::Season => games.rev().collect(),
        Window::Last10 => games.rev().take(LAST_N_GAMES).collect(),
    }
}

/// Groups come from season-to-date form regardless of window, so a player
/// never changes group between the two snapshots of a slate.
fn classify_players(
    rows: &[&GameLogRow],
    bios: &[PlayerBio],
    classifier: &dyn PositionClassifier,
) -> HashMap<u64, PositionGroup> {
    let bios: HashMap<u64, &PlayerBio> = bios.iter().map(|b| (b.player_id, b)).collect();

    let mut totals: HashMap<u64, (u32, f64, f64)> = HashMap::new();
    for row in rows {
        let t = totals.entry(row.entity_id).or_default();
        t.0 += 1;
        t.1 += row.ast;
        t.2 += row.reb;
    }

    totals
        .into_iter()
        .map(|(player_id, (games, ast, reb))| {
            let bio = bios.get(&player_id);
            let profile = PlayerProfile {
                player_id,
                position: bio.and_then(|b| b.position.as_deref()),
                height_inches: bio.and_then(|b| b.height_inches),
                ast_per_game: Some(ast / games as f64),
                reb_per_game: Some(reb / games as f64),
            };
            (player_id, classifier.classify(&profile))
        })
        .collect()
}

fn defense_table(
    rows: &[&GameLogRow],
    groups: &HashMap<u64, PositionGroup>,
    included: &HashMap<&str, HashSet<&str>>,
) -> BTreeMap<String, BTreeMap<PositionGroup, [TeamDefenseAggregate; STAT_COUNT]>> {
    // defending team → group → game → per-stat total
    let mut per_game: HashMap<&str, HashMap<PositionGroup, HashMap<&str, [f64; STAT_COUNT]>>> =
        HashMap::new();

    for row in rows {
        let Some(group) = groups.get(&row.entity_id) else { continue };
        let defender = row.opponent_id.as_str();
        if !included.get(defender).is_some_and(|g| g.contains(row.game_id.as_str())) {
            continue;
        }
        let totals = per_game
            .entry(defender)
            .or_default()
            .entry(*group)
            .or_default()
            .entry(row.game_id.as_str())
            .or_insert([0.0; STAT_COUNT]);
        for stat in Stat::ALL {
            totals[stat.index()] += stat.value(row);
        }
    }

    let mut table = BTreeMap::new();
    for (team, by_group) in per_game {
        let entry: &mut BTreeMap<_, _> = table.entry(team.to_string()).or_default();
        for (group, games) in by_group {
            let games_counted = games.len() as u32;
            let mut cells = [TeamDefenseAggregate::default(); STAT_COUNT];
            for stat in Stat::ALL {
                let total: f64 = games.values().map(|t| t[stat.index()]).sum();
                cells[stat.index()] = TeamDefenseAggregate {
                    allowed_average: round3(total / games_counted as f64),
                    games_counted,
                };
            }
            entry.insert(group, cells);
        }
    }
    table
}

fn environment_table(
    rows: &[&GameLogRow],
    included: &HashMap<&str, HashSet<&str>>,
) -> BTreeMap<String, TeamEnvironment> {
    #[derive(Default)]
    struct Acc {
        games: u32,
        pace: (f64, u32),
        def_rating: (f64, u32),
    }

    let mut acc: BTreeMap<&str, Acc> = BTreeMap::new();
    for row in rows {
        if !included.get(row.team.as_str()).is_some_and(|g| g.contains(row.game_id.as_str())) {
            continue;
        }
        let a = acc.entry(row.team.as_str()).or_default();
        a.games += 1;
        if let Some(p) = row.pace_estimate {
            a.pace.0 += p;
            a.pace.1 += 1;
        }
        if let Some(d) = row.defensive_rating_estimate {
            a.def_rating.0 += d;
            a.def_rating.1 += 1;
        }
    }

    let mean = |(sum, n): (f64, u32)| (n > 0).then(|| round3(sum / n as f64));
    acc.into_iter()
        .map(|(team, a)| {
            (
                team.to_string(),
                TeamEnvironment {
                    def_rating: mean(a.def_rating),
                    pace: mean(a.pace),
                    games: a.games,
                },
            )
        })
        .collect()
}

fn player_usage(
    rows: &[&GameLogRow],
    groups: &HashMap<u64, PositionGroup>,
    window: Window,
) -> BTreeMap<u64, PlayerUsage> {
    let mut by_player: HashMap<u64, Vec<&GameLogRow>> = HashMap::new();
    for row in rows {
        by_player.entry(row.entity_id).or_default().push(row);
    }

    let mut usage = BTreeMap::new();
    for (player_id, mut games) in by_player {
        games.sort_by(|a, b| (b.game_date, &b.game_id).cmp(&(a.game_date, &a.game_id)));
        if window == Window::Last10 {
            games.truncate(LAST_N_GAMES);
        }
        let Some(latest) = games.first() else { continue };
        let Some(group) = groups.get(&player_id) else { continue };

        let n = games.len() as f64;
        let mut stat_averages = [0.0; STAT_COUNT];
        for stat in Stat::ALL {
            stat_averages[stat.index()] = round3(games.iter().map(|r| stat.value(r)).sum::<f64>() / n);
        }

        usage.insert(
            player_id,
            PlayerUsage {
                player_id,
                player_name: latest.entity_name.clone(),
                team: latest.team.clone(),
                position_group: *group,
                games_played: games.len() as u32,
                avg_minutes: round3(games.iter().map(|r| r.minutes).sum::<f64>() / n),
                stat_averages,
                last_game_date: latest.game_date,
            },
        );
    }
    usage
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ProfileClassifier;
    use crate::testutil::{date, player_row, team_row};

    fn guard(player_id: u64, team: &str, opp: &str, game_id: &str, day: u32, pts: f64) -> GameLogRow {
        let mut row = player_row(player_id, team, opp, game_id, date(2025, 11, day), pts);
        row.ast = 6.0;
        row
    }

    fn center(player_id: u64, team: &str, opp: &str, game_id: &str, day: u32, pts: f64) -> GameLogRow {
        let mut row = player_row(player_id, team, opp, game_id, date(2025, 11, day), pts);
        row.ast = 1.0;
        row.reb = 11.0;
        row
    }

    fn run(players: &[GameLogRow], teams: &[GameLogRow], as_of: NaiveDate, window: Window) -> WindowAggregate {
        aggregate(players, teams, &[], as_of, window, &ProfileClassifier)
    }

    #[test]
    fn allowed_average_sums_group_per_game() {
        // Two BOS guards score against NYK in g1; one in g2.
        let players = vec![
            guard(1, "BOS", "NYK", "g1", 1, 20.0),
            guard(2, "BOS", "NYK", "g1", 1, 10.0),
            guard(1, "BOS", "NYK", "g2", 3, 18.0),
        ];
        let agg = run(&players, &[], date(2025, 11, 30), Window::Season);

        let cell = agg.defense("NYK", PositionGroup::Guards, Stat::Pts).unwrap();
        assert_eq!(cell.games_counted, 2);
        assert_eq!(cell.allowed_average, 24.0);
        assert!(agg.defense("NYK", PositionGroup::Centers, Stat::Pts).is_none());
        assert!(agg.defense("BOS", PositionGroup::Guards, Stat::Pts).is_none());
        assert_eq!(agg.latest_game_date, Some(date(2025, 11, 3)));
    }

    #[test]
    fn cutoff_excludes_later_games() {
        let players = vec![
            guard(1, "BOS", "NYK", "g1", 1, 20.0),
            guard(1, "BOS", "NYK", "g2", 5, 40.0),
        ];
        let agg = run(&players, &[], date(2025, 11, 4), Window::Season);
        let cell = agg.defense("NYK", PositionGroup::Guards, Stat::Pts).unwrap();
        assert_eq!(cell.games_counted, 1);
        assert_eq!(cell.allowed_average, 20.0);
        assert_eq!(agg.players[&1].games_played, 1);
        assert_eq!(agg.latest_game_date, Some(date(2025, 11, 1)));
    }

    #[test]
    fn last10_takes_most_recent_with_game_id_tie_break() {
        // 12 NYK games; the last two share a date.
        let mut players: Vec<GameLogRow> = (1..=11)
            .map(|day| guard(1, "BOS", "NYK", &format!("g{:02}", day), day, day as f64))
            .collect();
        players.push(guard(1, "BOS", "NYK", "g12", 11, 100.0));

        let agg = run(&players, &[], date(2025, 11, 30), Window::Last10);
        let cell = agg.defense("NYK", PositionGroup::Guards, Stat::Pts).unwrap();
        assert_eq!(cell.games_counted, 10);
        // Included: g12 (100) + g03..g11 (3..=11); g01 and g02 drop out.
        let expected = (100.0 + (3..=11).sum::<i32>() as f64) / 10.0;
        assert_eq!(cell.allowed_average, round3(expected));
        assert_eq!(agg.players[&1].games_played, 10);
    }

    #[test]
    fn last10_with_short_history_uses_all_games() {
        let players: Vec<GameLogRow> = (1..=4)
            .map(|day| guard(1, "BOS", "NYK", &format!("g{day}"), day, 10.0))
            .collect();
        let agg = run(&players, &[], date(2025, 11, 30), Window::Last10);
        assert_eq!(agg.defense("NYK", PositionGroup::Guards, Stat::Pts).unwrap().games_counted, 4);
    }

    #[test]
    fn last10_window_is_the_defending_teams_schedule() {
        // NYK plays 10 newer games against MIA guards; the old BOS game falls out
        // even though it is the only game BOS centers appear in.
        let mut players = vec![center(7, "BOS", "NYK", "g00", 1, 30.0)];
        for day in 2..=11 {
            players.push(guard(2, "MIA", "NYK", &format!("g{:02}", day), day, 12.0));
        }
        let season = run(&players, &[], date(2025, 11, 30), Window::Season);
        let last10 = run(&players, &[], date(2025, 11, 30), Window::Last10);
        assert!(season.defense("NYK", PositionGroup::Centers, Stat::Pts).is_some());
        assert!(last10.defense("NYK", PositionGroup::Centers, Stat::Pts).is_none());
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let mut bad = guard(3, "BOS", "NYK", "g1", 1, 50.0);
        bad.pts = f64::NAN;
        let mut negative = guard(4, "BOS", "NYK", "g1", 1, 50.0);
        negative.reb = -1.0;
        let players = vec![guard(1, "BOS", "NYK", "g1", 1, 20.0), bad, negative];

        let agg = run(&players, &[], date(2025, 11, 30), Window::Season);
        assert_eq!(agg.skipped_rows, 2);
        assert_eq!(agg.defense("NYK", PositionGroup::Guards, Stat::Pts).unwrap().allowed_average, 20.0);
        assert!(!agg.players.contains_key(&3));
    }

    #[test]
    fn duplicate_rows_count_once() {
        let row = guard(1, "BOS", "NYK", "g1", 1, 20.0);
        let agg = run(&[row.clone(), row], &[], date(2025, 11, 30), Window::Season);
        assert_eq!(agg.defense("NYK", PositionGroup::Guards, Stat::Pts).unwrap().allowed_average, 20.0);
    }

    #[test]
    fn environment_means_over_window() {
        let teams: Vec<GameLogRow> = (1..=12)
            .map(|day| team_row(10, "NYK", "BOS", &format!("g{:02}", day), date(2025, 11, day), 90.0 + day as f64, 100.0))
            .collect();
        let season = run(&[], &teams, date(2025, 11, 30), Window::Season);
        let last10 = run(&[], &teams, date(2025, 11, 30), Window::Last10);

        assert_eq!(season.environment["NYK"].games, 12);
        assert_eq!(season.environment["NYK"].pace, Some(96.5));
        assert_eq!(last10.environment["NYK"].games, 10);
        assert_eq!(last10.environment["NYK"].pace, Some(97.5));
        assert_eq!(last10.environment["NYK"].def_rating, Some(100.0));
    }

    #[test]
    fn nothing_before_cutoff_is_empty() {
        let players = vec![guard(1, "BOS", "NYK", "g1", 10, 20.0)];
        let agg = run(&players, &[], date(2025, 11, 1), Window::Season);
        assert!(agg.is_empty());
        assert!(agg.players.is_empty());
        assert!(agg.defense.is_empty());
    }

    #[test]
    fn player_usage_uses_latest_team() {
        let players = vec![
            guard(1, "BOS", "NYK", "g1", 1, 20.0),
            guard(1, "MIA", "ORL", "g2", 3, 10.0),
        ];
        let agg = run(&players, &[], date(2025, 11, 30), Window::Season);
        let usage = &agg.players[&1];
        assert_eq!(usage.team, "MIA");
        assert_eq!(usage.games_played, 2);
        assert_eq!(usage.stat_averages[Stat::Pts.index()], 15.0);
        assert_eq!(usage.position_group, PositionGroup::Guards);
    }
}
