//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::classifier::PlayerBio;
use crate::error::{AppError, Result};
use crate::fetcher::LogProvider;
use crate::types::{Game, GameLogRow, InjuryTag};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn player_row(
    player_id: u64,
    team: &str,
    opponent: &str,
    game_id: &str,
    game_date: NaiveDate,
    pts: f64,
) -> GameLogRow {
    GameLogRow {
        entity_id: player_id,
        entity_name: format!("Player {player_id}"),
        team: team.to_string(),
        season: crate::types::season_label_for_date(game_date),
        game_id: game_id.to_string(),
        game_date,
        opponent_id: opponent.to_string(),
        minutes: 30.0,
        pts,
        reb: 5.0,
        ast: 3.0,
        threes_made: 2.0,
        stl: 1.0,
        blk: 0.5,
        pace_estimate: None,
        defensive_rating_estimate: None,
    }
}

pub fn team_row(
    team_id: u64,
    team: &str,
    opponent: &str,
    game_id: &str,
    game_date: NaiveDate,
    pace: f64,
    def_rating: f64,
) -> GameLogRow {
    GameLogRow {
        entity_id: team_id,
        entity_name: team.to_string(),
        team: team.to_string(),
        season: crate::types::season_label_for_date(game_date),
        game_id: game_id.to_string(),
        game_date,
        opponent_id: opponent.to_string(),
        minutes: 240.0,
        pts: 110.0,
        reb: 44.0,
        ast: 25.0,
        threes_made: 12.0,
        stl: 7.0,
        blk: 5.0,
        pace_estimate: Some(pace),
        defensive_rating_estimate: Some(def_rating),
    }
}

pub fn game(game_id: &str, away: &str, home: &str) -> Game {
    Game {
        game_id: game_id.to_string(),
        start_time_utc: None,
        away_team: away.to_string(),
        home_team: home.to_string(),
    }
}

/// In-memory provider with call counters and switchable failure.
#[derive(Default)]
pub struct FakeProvider {
    player_rows: Mutex<Vec<GameLogRow>>,
    team_rows: Mutex<Vec<GameLogRow>>,
    games: Mutex<Vec<Game>>,
    injuries: Mutex<Vec<InjuryTag>>,
    failing: AtomicBool,
    logs_failing: AtomicBool,
    injuries_failing: AtomicBool,
    delay_ms: AtomicU64,
    player_fetches: AtomicU64,
}

impl FakeProvider {
    pub fn with_rows(player_rows: Vec<GameLogRow>) -> Arc<Self> {
        let provider = Self::default();
        *provider.player_rows.lock().unwrap() = player_rows;
        Arc::new(provider)
    }

    pub fn set_player_rows(&self, rows: Vec<GameLogRow>) {
        *self.player_rows.lock().unwrap() = rows;
    }

    pub fn set_team_rows(&self, rows: Vec<GameLogRow>) {
        *self.team_rows.lock().unwrap() = rows;
    }

    pub fn set_games(&self, games: Vec<Game>) {
        *self.games.lock().unwrap() = games;
    }

    pub fn set_injuries(&self, injuries: Vec<InjuryTag>) {
        *self.injuries.lock().unwrap() = injuries;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fails only the player and team log fetches.
    pub fn set_logs_failing(&self, failing: bool) {
        self.logs_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_injuries_failing(&self, failing: bool) {
        self.injuries_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn player_fetches(&self) -> u64 {
        self.player_fetches.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Malformed("provider offline".into()));
        }
        Ok(())
    }

    fn check_logs(&self) -> Result<()> {
        self.check()?;
        if self.logs_failing.load(Ordering::SeqCst) {
            return Err(AppError::Malformed("game log endpoint offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogProvider for FakeProvider {
    async fn fetch_player_logs(&self, _season: &str) -> Result<Vec<GameLogRow>> {
        self.player_fetches.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.check_logs()?;
        Ok(self.player_rows.lock().unwrap().clone())
    }

    async fn fetch_team_logs(&self, _season: &str) -> Result<Vec<GameLogRow>> {
        self.pause().await;
        self.check_logs()?;
        Ok(self.team_rows.lock().unwrap().clone())
    }

    async fn fetch_player_bios(&self, _season: &str) -> Result<Vec<PlayerBio>> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn fetch_injury_report(&self, _slate_date: NaiveDate) -> Result<Vec<InjuryTag>> {
        if self.injuries_failing.load(Ordering::SeqCst) {
            return Err(AppError::Malformed("injury feed offline".into()));
        }
        Ok(self.injuries.lock().unwrap().clone())
    }

    async fn fetch_slate_games(&self, _slate_date: NaiveDate) -> Result<Vec<Game>> {
        self.check()?;
        Ok(self.games.lock().unwrap().clone())
    }
}
