use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Season,
    Last10,
}

impl Window {
    pub const ALL: [Window; 2] = [Window::Season, Window::Last10];

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Season => "season",
            Window::Last10 => "last10",
        }
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Window {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "season" => Ok(Window::Season),
            "last10" => Ok(Window::Last10),
            other => Err(format!("unknown window '{other}' (expected season or last10)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Position groups and statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PositionGroup {
    Guards,
    Forwards,
    Centers,
}

impl PositionGroup {
    pub const ALL: [PositionGroup; 3] =
        [PositionGroup::Guards, PositionGroup::Forwards, PositionGroup::Centers];
}

impl std::fmt::Display for PositionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PositionGroup::Guards => "Guards",
            PositionGroup::Forwards => "Forwards",
            PositionGroup::Centers => "Centers",
        };
        write!(f, "{s}")
    }
}

pub const STAT_COUNT: usize = 6;

/// The six statistics every matchup record carries, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stat {
    #[serde(rename = "PTS")]
    Pts,
    #[serde(rename = "REB")]
    Reb,
    #[serde(rename = "AST")]
    Ast,
    #[serde(rename = "3PM")]
    ThreePm,
    #[serde(rename = "STL")]
    Stl,
    #[serde(rename = "BLK")]
    Blk,
}

impl Stat {
    pub const ALL: [Stat; STAT_COUNT] =
        [Stat::Pts, Stat::Reb, Stat::Ast, Stat::ThreePm, Stat::Stl, Stat::Blk];

    /// Position of this stat inside the fixed-size per-record arrays.
    pub fn index(self) -> usize {
        match self {
            Stat::Pts => 0,
            Stat::Reb => 1,
            Stat::Ast => 2,
            Stat::ThreePm => 3,
            Stat::Stl => 4,
            Stat::Blk => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stat::Pts => "PTS",
            Stat::Reb => "REB",
            Stat::Ast => "AST",
            Stat::ThreePm => "3PM",
            Stat::Stl => "STL",
            Stat::Blk => "BLK",
        }
    }

    pub fn value(self, row: &GameLogRow) -> f64 {
        match self {
            Stat::Pts => row.pts,
            Stat::Reb => row.reb,
            Stat::Ast => row.ast,
            Stat::ThreePm => row.threes_made,
            Stat::Stl => row.stl,
            Stat::Blk => row.blk,
        }
    }
}

impl std::fmt::Display for Stat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// rank 1–6
    Green,
    /// rank 7–12
    Yellow,
    /// rank 13–20
    Orange,
    /// rank 21–30
    Red,
}

impl Tier {
    pub fn from_rank(rank: u8) -> Self {
        use crate::config::tier_bounds::*;
        if rank <= GREEN_MAX {
            Tier::Green
        } else if rank <= YELLOW_MAX {
            Tier::Yellow
        } else if rank <= ORANGE_MAX {
            Tier::Orange
        } else {
            Tier::Red
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Green => "green",
            Tier::Yellow => "yellow",
            Tier::Orange => "orange",
            Tier::Red => "red",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Raw game logs
// ---------------------------------------------------------------------------

/// One player's or one team's box-score line for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameLogRow {
    /// Player id for player rows, team id for team rows.
    pub entity_id: u64,
    pub entity_name: String,
    /// Abbreviation of the team the entity played for.
    pub team: String,
    pub season: String,
    pub game_id: String,
    pub game_date: NaiveDate,
    /// Opponent team abbreviation.
    pub opponent_id: String,
    pub minutes: f64,
    pub pts: f64,
    pub reb: f64,
    pub ast: f64,
    pub threes_made: f64,
    pub stl: f64,
    pub blk: f64,
    /// Team rows only.
    pub pace_estimate: Option<f64>,
    /// Team rows only. Points allowed per 100 possessions.
    pub defensive_rating_estimate: Option<f64>,
}

// ---------------------------------------------------------------------------
// Slate inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub start_time_utc: Option<String>,
    pub away_team: String,
    pub home_team: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryTag {
    pub player_name: String,
    pub team: String,
    pub status: String,
    pub comment: Option<String>,
}

// ---------------------------------------------------------------------------
// Snapshot payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMatchupRecord {
    pub player_id: u64,
    pub player_name: String,
    pub team: String,
    pub opponent: String,
    pub position_group: PositionGroup,
    pub avg_minutes: f64,
    pub games_played: u32,
    pub injury_status: Option<String>,
    /// None when the opponent has no team metrics in this window.
    pub environment_score: Option<f64>,
    /// Defensive-strength rank of the opponent per stat (1 = stingiest). None = no data.
    pub stat_ranks: [Option<u8>; STAT_COUNT],
    pub stat_allowed: [Option<f64>; STAT_COUNT],
    pub stat_tiers: [Option<Tier>; STAT_COUNT],
}

impl PlayerMatchupRecord {
    pub fn rank(&self, stat: Stat) -> Option<u8> {
        self.stat_ranks[stat.index()]
    }

    pub fn tier(&self, stat: Stat) -> Option<Tier> {
        self.stat_tiers[stat.index()]
    }
}

/// One player's own per-game production over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCard {
    pub player_id: u64,
    pub player_name: String,
    pub team: String,
    pub season: String,
    pub window: Window,
    /// Cutoff the card was computed for.
    pub as_of_date: NaiveDate,
    pub last_game_date: NaiveDate,
    pub position_group: PositionGroup,
    pub games_played: u32,
    pub minutes_pg: f64,
    pub points_pg: f64,
    pub rebounds_pg: f64,
    pub assists_pg: f64,
    pub threes_made_pg: f64,
    pub steals_pg: f64,
    pub blocks_pg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupSnapshot {
    pub slate_date: NaiveDate,
    pub window: Window,
    /// Last game date incorporated.
    pub as_of_date: NaiveDate,
    /// Latest game date in the raw logs the snapshot was built from. Below
    /// the cutoff it means the logs had not caught up yet.
    #[serde(default)]
    pub logs_through: Option<NaiveDate>,
    pub games: Vec<Game>,
    pub injuries: Vec<InjuryTag>,
    pub players: Vec<PlayerMatchupRecord>,
}

impl MatchupSnapshot {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.slate_date, self.window)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub slate_date: NaiveDate,
    pub window: Window,
}

impl SnapshotKey {
    pub fn new(slate_date: NaiveDate, window: Window) -> Self {
        Self { slate_date, window }
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.slate_date, self.window)
    }
}

// ---------------------------------------------------------------------------
// Season calendar
// ---------------------------------------------------------------------------

/// `2025-11-02` → `"2025-26"`. Seasons roll over on October 1.
pub fn season_label_for_date(date: NaiveDate) -> String {
    let start_year = if date.month() >= 10 { date.year() } else { date.year() - 1 };
    format!("{start_year}-{:02}", (start_year + 1) % 100)
}

/// `(Oct 1, Jun 30)` for a label such as `"2025-26"`.
pub fn season_bounds(label: &str) -> Option<(NaiveDate, NaiveDate)> {
    let start_year: i32 = label.split('-').next()?.parse().ok()?;
    Some((
        NaiveDate::from_ymd_opt(start_year, 10, 1)?,
        NaiveDate::from_ymd_opt(start_year + 1, 6, 30)?,
    ))
}

/// Game logs are incorporated through the day before the slate.
pub fn as_of_date_for_slate(slate_date: NaiveDate) -> NaiveDate {
    slate_date - Duration::days(1)
}

/// Slates are named by their US Eastern date.
pub fn current_et_date() -> NaiveDate {
    et_date_at(Utc::now())
}

pub fn et_date_at(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&New_York).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn season_label_rolls_over_in_october() {
        assert_eq!(season_label_for_date(d(2025, 11, 2)), "2025-26");
        assert_eq!(season_label_for_date(d(2026, 2, 11)), "2025-26");
        assert_eq!(season_label_for_date(d(2026, 9, 30)), "2025-26");
        assert_eq!(season_label_for_date(d(2026, 10, 1)), "2026-27");
        assert_eq!(season_label_for_date(d(2099, 12, 1)), "2099-00");
    }

    #[test]
    fn season_bounds_parse_label() {
        let (start, end) = season_bounds("2025-26").unwrap();
        assert_eq!(start, d(2025, 10, 1));
        assert_eq!(end, d(2026, 6, 30));
        assert!(season_bounds("garbage").is_none());
    }

    #[test]
    fn as_of_is_previous_day() {
        assert_eq!(as_of_date_for_slate(d(2026, 3, 1)), d(2026, 2, 28));
    }

    #[test]
    fn eastern_date_tracks_dst() {
        let at = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
        // January: UTC-5.
        assert_eq!(et_date_at(at("2026-01-16T04:30:00Z")), d(2026, 1, 15));
        assert_eq!(et_date_at(at("2026-01-16T05:30:00Z")), d(2026, 1, 16));
        // April: UTC-4.
        assert_eq!(et_date_at(at("2026-04-02T03:30:00Z")), d(2026, 4, 1));
        assert_eq!(et_date_at(at("2026-04-02T04:30:00Z")), d(2026, 4, 2));
        // Transition nights.
        assert_eq!(et_date_at(at("2025-11-02T04:30:00Z")), d(2025, 11, 2));
        assert_eq!(et_date_at(at("2026-03-08T04:30:00Z")), d(2026, 3, 7));
    }

    #[test]
    fn stat_indices_match_display_order() {
        for (i, stat) in Stat::ALL.iter().enumerate() {
            assert_eq!(stat.index(), i);
        }
        assert_eq!(serde_json::to_string(&Stat::ThreePm).unwrap(), "\"3PM\"");
    }

    #[test]
    fn window_parses_case_insensitively() {
        assert_eq!("Season".parse::<Window>().unwrap(), Window::Season);
        assert_eq!("last10".parse::<Window>().unwrap(), Window::Last10);
        assert!("last5".parse::<Window>().is_err());
    }
}
