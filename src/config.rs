use std::time::Duration;

use crate::error::{AppError, Result};

pub const NBA_STATS_URL: &str = "https://stats.nba.com/stats";
pub const NBA_CDN_URL: &str = "https://cdn.nba.com/static/json/liveData";

/// Teams in the league. Environment-score normalization divides by `LEAGUE_SIZE - 1`.
pub const LEAGUE_SIZE: u8 = 30;

/// Games counted per team under the `last10` window.
pub const LAST_N_GAMES: usize = 10;

/// Players averaging fewer minutes than this are not part of the rotation pool.
pub const DEFAULT_ROTATION_MIN_MINUTES: f64 = 5.0;

/// How long a fetched season log set is considered fresh even if it does not
/// yet cover the requested date (off days produce no new rows).
pub const DEFAULT_RAW_LOG_TTL_SECS: u64 = 20 * 60;

/// Upper bound on a single snapshot computation, upstream fetches included.
pub const DEFAULT_COMPUTE_TIMEOUT_SECS: u64 = 120;

/// Per-request timeout for upstream HTTP calls.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Inclusive upper rank bound for each tier (1 = stingiest defense).
pub mod tier_bounds {
    pub const GREEN_MAX: u8 = 6;
    pub const YELLOW_MAX: u8 = 12;
    pub const ORANGE_MAX: u8 = 20;
}

/// Environment score blend.
pub mod environment_weights {
    pub const DEFENSIVE_RATING: f64 = 0.6;
    pub const PACE: f64 = 0.4;
}

/// Where computed snapshots live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    /// Process-local; snapshots are recomputed after a restart.
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::Config(format!(
                "SNAPSHOT_STORE must be sqlite or memory, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    /// Snapshot store backend (SNAPSHOT_STORE)
    pub snapshot_store: StoreBackend,
    pub api_port: u16,
    /// Base URL of the stats API (NBA_STATS_URL)
    pub nba_stats_url: String,
    /// Base URL of the live-data CDN serving the injury report (NBA_CDN_URL)
    pub nba_cdn_url: String,
    /// Per-request upstream timeout (UPSTREAM_TIMEOUT_SECS)
    pub upstream_timeout: Duration,
    /// Freshness window for cached season logs (RAW_LOG_TTL_SECS)
    pub raw_log_ttl: Duration,
    /// Bound on one snapshot computation (COMPUTE_TIMEOUT_SECS)
    pub compute_timeout: Duration,
    /// Rotation cutoff in average minutes (ROTATION_MIN_MINUTES)
    pub rotation_min_minutes: f64,
    /// Recompute immediately on refresh unless the request says otherwise (EAGER_REFRESH)
    pub eager_refresh: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "matchups.db".to_string()),
            snapshot_store: match std::env::var("SNAPSHOT_STORE") {
                Ok(v) => v.parse()?,
                Err(_) => StoreBackend::Sqlite,
            },
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            nba_stats_url: std::env::var("NBA_STATS_URL")
                .unwrap_or_else(|_| NBA_STATS_URL.to_string()),
            nba_cdn_url: std::env::var("NBA_CDN_URL").unwrap_or_else(|_| NBA_CDN_URL.to_string()),
            upstream_timeout: Duration::from_secs(env_u64(
                "UPSTREAM_TIMEOUT_SECS",
                DEFAULT_UPSTREAM_TIMEOUT_SECS,
            )?),
            raw_log_ttl: Duration::from_secs(env_u64("RAW_LOG_TTL_SECS", DEFAULT_RAW_LOG_TTL_SECS)?),
            compute_timeout: Duration::from_secs(env_u64(
                "COMPUTE_TIMEOUT_SECS",
                DEFAULT_COMPUTE_TIMEOUT_SECS,
            )?),
            rotation_min_minutes: std::env::var("ROTATION_MIN_MINUTES")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(DEFAULT_ROTATION_MIN_MINUTES),
            eager_refresh: std::env::var("EAGER_REFRESH")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "matchups.db".to_string(),
            snapshot_store: StoreBackend::Sqlite,
            api_port: 8000,
            nba_stats_url: NBA_STATS_URL.to_string(),
            nba_cdn_url: NBA_CDN_URL.to_string(),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            raw_log_ttl: Duration::from_secs(DEFAULT_RAW_LOG_TTL_SECS),
            compute_timeout: Duration::from_secs(DEFAULT_COMPUTE_TIMEOUT_SECS),
            rotation_min_minutes: DEFAULT_ROTATION_MIN_MINUTES,
            eager_refresh: false,
        }
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|_| AppError::Config(format!("{name} must be a whole number of seconds"))),
        Err(_) => Ok(default),
    }
}
