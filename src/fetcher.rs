use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER, USER_AGENT};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classifier::{parse_height_inches, PlayerBio};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::{Game, GameLogRow, InjuryTag};

/// Backoff between attempts of one upstream request. Length bounds the retries.
const RETRY_BACKOFF_MS: &[u64] = &[250, 500, 1000];

/// Upstream source of raw rows. Everything past this seam is provider-agnostic.
#[async_trait]
pub trait LogProvider: Send + Sync {
    async fn fetch_player_logs(&self, season: &str) -> Result<Vec<GameLogRow>>;

    async fn fetch_team_logs(&self, season: &str) -> Result<Vec<GameLogRow>>;

    /// Roster metadata used by the position classifier. Optional upstream.
    async fn fetch_player_bios(&self, _season: &str) -> Result<Vec<PlayerBio>> {
        Ok(Vec::new())
    }

    async fn fetch_injury_report(&self, slate_date: NaiveDate) -> Result<Vec<InjuryTag>>;

    async fn fetch_slate_games(&self, slate_date: NaiveDate) -> Result<Vec<Game>>;
}

// ---------------------------------------------------------------------------
// stats.nba.com / cdn.nba.com client
// ---------------------------------------------------------------------------

pub struct NbaStatsClient {
    client: reqwest::Client,
    stats_url: String,
    cdn_url: String,
}

impl NbaStatsClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        // stats.nba.com drops requests that do not look like they come from nba.com.
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64)"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.nba.com/"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://www.nba.com"));

        let client = reqwest::Client::builder()
            .timeout(cfg.upstream_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            stats_url: cfg.nba_stats_url.trim_end_matches('/').to_string(),
            cdn_url: cfg.nba_cdn_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let mut last_err = None;
        for (attempt, backoff_ms) in RETRY_BACKOFF_MS.iter().enumerate() {
            match self.try_get_json(url).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    warn!(
                        "Upstream request failed (attempt {}/{}): {url}: {e}",
                        attempt + 1,
                        RETRY_BACKOFF_MS.len()
                    );
                    last_err = Some(e);
                    if attempt + 1 < RETRY_BACKOFF_MS.len() {
                        tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AppError::Malformed(format!("no attempts made for {url}"))))
    }

    async fn try_get_json(&self, url: &str) -> Result<Value> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl LogProvider for NbaStatsClient {
    async fn fetch_player_logs(&self, season: &str) -> Result<Vec<GameLogRow>> {
        let url = format!(
            "{}/playergamelogs?Season={season}&SeasonType=Regular%20Season&LeagueID=00",
            self.stats_url
        );
        let resp = self.get_json(&url).await?;
        let table = first_result_table(&resp)?;
        let rows = parse_player_log_rows(&table, season);
        info!("Fetched {} player log rows for season {season}", rows.len());
        Ok(rows)
    }

    async fn fetch_team_logs(&self, season: &str) -> Result<Vec<GameLogRow>> {
        let url = format!(
            "{}/leaguegamefinder?PlayerOrTeam=T&Season={season}&SeasonType=Regular%20Season&LeagueID=00",
            self.stats_url
        );
        let resp = self.get_json(&url).await?;
        let table = first_result_table(&resp)?;
        let lines = parse_team_lines(&table);
        let rows = attach_team_estimates(lines, season);
        info!("Fetched {} team log rows for season {season}", rows.len());
        Ok(rows)
    }

    async fn fetch_player_bios(&self, season: &str) -> Result<Vec<PlayerBio>> {
        let url = format!("{}/playerindex?LeagueID=00&Season={season}", self.stats_url);
        let resp = self.get_json(&url).await?;
        let table = first_result_table(&resp)?;
        Ok(parse_player_bios(&table))
    }

    async fn fetch_injury_report(&self, slate_date: NaiveDate) -> Result<Vec<InjuryTag>> {
        let urls = [
            format!(
                "{}/injuryReport/injuryReport_{}.json",
                self.cdn_url,
                slate_date.format("%Y%m%d")
            ),
            format!("{}/injuryReport/injuryReport.json", self.cdn_url),
        ];

        let mut last_err = None;
        for url in &urls {
            match self.try_get_json(url).await {
                Ok(v) => return Ok(parse_injury_report(&v)),
                Err(e) => {
                    debug!("Injury report unavailable at {url}: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| AppError::Malformed("no injury report urls".to_string())))
    }

    async fn fetch_slate_games(&self, slate_date: NaiveDate) -> Result<Vec<Game>> {
        let url = format!(
            "{}/scoreboardv2?GameDate={}&LeagueID=00&DayOffset=0",
            self.stats_url,
            slate_date.format("%m/%d/%Y")
        );
        let resp = self.get_json(&url).await?;
        let tables = result_tables(&resp)?;
        let header = tables
            .iter()
            .find(|t| t.name == "GameHeader")
            .ok_or_else(|| AppError::Malformed("scoreboard missing GameHeader".to_string()))?;
        let line_score = tables.iter().find(|t| t.name == "LineScore");
        Ok(dedupe_games(parse_scoreboard(header, line_score)))
    }
}

// ---------------------------------------------------------------------------
// resultSets tables
// ---------------------------------------------------------------------------

/// One `{name, headers, rowSet}` table from a stats API response.
#[derive(Debug, Clone)]
pub struct ResultTable {
    pub name: String,
    headers: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl ResultTable {
    fn cell<'a>(&self, row: &'a [Value], col: &str) -> Option<&'a Value> {
        self.headers.get(col).and_then(|&i| row.get(i))
    }

    fn str_at(&self, row: &[Value], col: &str) -> Option<String> {
        match self.cell(row, col)? {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn f64_at(&self, row: &[Value], col: &str) -> Option<f64> {
        let v = self.cell(row, col)?;
        v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    }

    fn u64_at(&self, row: &[Value], col: &str) -> Option<u64> {
        let v = self.cell(row, col)?;
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    }
}

/// Accepts both the `resultSets` array and the single `resultSet` object shapes.
pub fn result_tables(resp: &Value) -> Result<Vec<ResultTable>> {
    let sets: Vec<&Value> = match (resp.get("resultSets"), resp.get("resultSet")) {
        (Some(Value::Array(a)), _) => a.iter().collect(),
        (_, Some(obj @ Value::Object(_))) => vec![obj],
        _ => {
            return Err(AppError::Malformed(
                "stats response has no resultSets".to_string(),
            ))
        }
    };

    let mut tables = Vec::with_capacity(sets.len());
    for set in sets {
        let name = set.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string();
        let headers = set
            .get("headers")
            .and_then(|h| h.as_array())
            .ok_or_else(|| AppError::Malformed(format!("result set '{name}' has no headers")))?
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.as_str().map(|s| (s.to_ascii_uppercase(), i)))
            .collect();
        let rows = set
            .get("rowSet")
            .and_then(|r| r.as_array())
            .ok_or_else(|| AppError::Malformed(format!("result set '{name}' has no rowSet")))?
            .iter()
            .filter_map(|r| r.as_array().cloned())
            .collect();
        tables.push(ResultTable { name, headers, rows });
    }
    Ok(tables)
}

fn first_result_table(resp: &Value) -> Result<ResultTable> {
    result_tables(resp)?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Malformed("stats response has an empty resultSets".to_string()))
}

/// `"2025-10-22T00:00:00"`, `"2025-10-22"` or `"OCT 22, 2025"`.
pub fn parse_game_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Some(Ok(d)) = s.get(..10).map(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d")) {
        return Some(d);
    }
    NaiveDate::parse_from_str(s, "%b %d, %Y").ok()
}

/// `"BOS @ CHI"` / `"BOS vs. CHI"` → `"CHI"`.
pub fn parse_matchup_opponent(matchup: &str) -> Option<String> {
    let last = matchup.split_whitespace().last()?;
    let abbr = last.replace('.', "").trim().to_ascii_uppercase();
    (!abbr.is_empty()).then_some(abbr)
}

fn parse_player_log_rows(table: &ResultTable, season: &str) -> Vec<GameLogRow> {
    let mut out = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;
    for row in &table.rows {
        match parse_log_row(table, row, season, "PLAYER_ID", "PLAYER_NAME") {
            Some(r) => out.push(r),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("Skipped {skipped} unparseable player log rows for season {season}");
    }
    out
}

fn parse_log_row(
    table: &ResultTable,
    row: &[Value],
    season: &str,
    id_col: &str,
    name_col: &str,
) -> Option<GameLogRow> {
    let matchup = table.str_at(row, "MATCHUP")?;
    Some(GameLogRow {
        entity_id: table.u64_at(row, id_col)?,
        entity_name: table.str_at(row, name_col).unwrap_or_default(),
        team: table.str_at(row, "TEAM_ABBREVIATION")?.to_ascii_uppercase(),
        season: season.to_string(),
        game_id: table.str_at(row, "GAME_ID")?,
        game_date: parse_game_date(&table.str_at(row, "GAME_DATE")?)?,
        opponent_id: parse_matchup_opponent(&matchup)?,
        minutes: table.f64_at(row, "MIN")?,
        pts: table.f64_at(row, "PTS").unwrap_or(0.0),
        reb: table.f64_at(row, "REB").unwrap_or(0.0),
        ast: table.f64_at(row, "AST").unwrap_or(0.0),
        threes_made: table.f64_at(row, "FG3M").unwrap_or(0.0),
        stl: table.f64_at(row, "STL").unwrap_or(0.0),
        blk: table.f64_at(row, "BLK").unwrap_or(0.0),
        pace_estimate: None,
        defensive_rating_estimate: None,
    })
}

/// A team box-score line plus the possession inputs needed for pace.
#[derive(Debug, Clone)]
pub struct TeamLine {
    pub row: GameLogRow,
    pub fga: f64,
    pub fta: f64,
    pub oreb: f64,
    pub tov: f64,
}

impl TeamLine {
    fn possessions(&self) -> f64 {
        self.fga + 0.44 * self.fta - self.oreb + self.tov
    }
}

fn parse_team_lines(table: &ResultTable) -> Vec<TeamLine> {
    table
        .rows
        .iter()
        .filter_map(|row| {
            Some(TeamLine {
                row: parse_log_row(table, row, "", "TEAM_ID", "TEAM_NAME")?,
                fga: table.f64_at(row, "FGA")?,
                fta: table.f64_at(row, "FTA")?,
                oreb: table.f64_at(row, "OREB")?,
                tov: table.f64_at(row, "TOV")?,
            })
        })
        .collect()
}

/// Pairs each team line with its opponent's line in the same game and fills in
/// pace (average possessions of both sides) and defensive rating
/// (opponent points per 100 possessions). Lines without an opponent keep `None`.
pub fn attach_team_estimates(lines: Vec<TeamLine>, season: &str) -> Vec<GameLogRow> {
    let mut by_game: HashMap<&str, Vec<&TeamLine>> = HashMap::new();
    for line in &lines {
        by_game.entry(line.row.game_id.as_str()).or_default().push(line);
    }

    let mut out = Vec::with_capacity(lines.len());
    for line in &lines {
        let opponent = by_game
            .get(line.row.game_id.as_str())
            .and_then(|group| group.iter().find(|o| o.row.team != line.row.team));

        let mut row = line.row.clone();
        row.season = season.to_string();
        if let Some(opp) = opponent {
            let possessions = 0.5 * (line.possessions() + opp.possessions());
            if possessions > 0.0 {
                row.pace_estimate = Some(possessions);
                row.defensive_rating_estimate = Some(opp.row.pts / possessions * 100.0);
            }
        }
        out.push(row);
    }
    out
}

fn parse_player_bios(table: &ResultTable) -> Vec<PlayerBio> {
    table
        .rows
        .iter()
        .filter_map(|row| {
            Some(PlayerBio {
                player_id: table.u64_at(row, "PERSON_ID").or_else(|| table.u64_at(row, "PLAYER_ID"))?,
                position: table.str_at(row, "POSITION"),
                height_inches: table
                    .str_at(row, "HEIGHT")
                    .and_then(|h| parse_height_inches(&h)),
            })
        })
        .collect()
}

fn parse_scoreboard(header: &ResultTable, line_score: Option<&ResultTable>) -> Vec<Game> {
    let mut abbr_by_game_team: HashMap<(String, u64), String> = HashMap::new();
    if let Some(ls) = line_score {
        for row in &ls.rows {
            if let (Some(game_id), Some(team_id), Some(abbr)) = (
                ls.str_at(row, "GAME_ID"),
                ls.u64_at(row, "TEAM_ID"),
                ls.str_at(row, "TEAM_ABBREVIATION"),
            ) {
                abbr_by_game_team.insert((game_id, team_id), abbr.to_ascii_uppercase());
            }
        }
    }

    header
        .rows
        .iter()
        .filter_map(|row| {
            let game_id = header.str_at(row, "GAME_ID")?;
            let home_id = header.u64_at(row, "HOME_TEAM_ID")?;
            let away_id = header.u64_at(row, "VISITOR_TEAM_ID")?;
            let home_team = abbr_by_game_team.get(&(game_id.clone(), home_id))?.clone();
            let away_team = abbr_by_game_team.get(&(game_id.clone(), away_id))?.clone();
            Some(Game {
                start_time_utc: header.str_at(row, "GAME_DATE_EST"),
                game_id,
                away_team,
                home_team,
            })
        })
        .collect()
}

/// One game per (away, home). Prefers a row with a start time, then the lowest
/// game id. Output sorted by (start, away, home, id).
pub fn dedupe_games(games: Vec<Game>) -> Vec<Game> {
    let mut deduped: HashMap<(String, String), Game> = HashMap::new();
    for game in games {
        let key = (game.away_team.clone(), game.home_team.clone());
        match deduped.get(&key) {
            Some(existing) => {
                let gains_start = existing.start_time_utc.is_none() && game.start_time_utc.is_some();
                let loses_start = existing.start_time_utc.is_some() && game.start_time_utc.is_none();
                if gains_start || (!loses_start && game.game_id < existing.game_id) {
                    deduped.insert(key, game);
                }
            }
            None => {
                deduped.insert(key, game);
            }
        }
    }

    let mut out: Vec<Game> = deduped.into_values().collect();
    out.sort_by(|a, b| {
        (a.start_time_utc.as_deref().unwrap_or(""), &a.away_team, &a.home_team, &a.game_id).cmp(&(
            b.start_time_utc.as_deref().unwrap_or(""),
            &b.away_team,
            &b.home_team,
            &b.game_id,
        ))
    });
    out
}

pub fn parse_injury_report(v: &Value) -> Vec<InjuryTag> {
    let Some(rows) = v
        .get("injuryReport")
        .and_then(|r| r.get("injuries"))
        .and_then(|i| i.as_array())
    else {
        return Vec::new();
    };

    let text = |row: &Value, keys: &[&str]| -> Option<String> {
        keys.iter()
            .filter_map(|k| row.get(*k).and_then(|x| x.as_str()))
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
    };

    rows.iter()
        .filter_map(|row| {
            Some(InjuryTag {
                player_name: text(row, &["playerName", "name"])?,
                team: text(row, &["teamAbbrev", "team"])?.to_ascii_uppercase(),
                status: text(row, &["status", "injuryStatus"])?.to_ascii_uppercase(),
                comment: text(row, &["description", "notes"]),
            })
        })
        .collect()
}
