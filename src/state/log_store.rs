use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classifier::PlayerBio;
use crate::db::SeasonLogArchive;
use crate::error::EngineError;
use crate::fetcher::LogProvider;
use crate::types::GameLogRow;

// ---------------------------------------------------------------------------
// SeasonLogCache
// ---------------------------------------------------------------------------

/// Everything fetched upstream for one season. Never mutated after
/// construction; refreshes build a new value and swap the `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonLogCache {
    pub season: String,
    pub player_logs: Vec<GameLogRow>,
    pub team_logs: Vec<GameLogRow>,
    pub bios: Vec<PlayerBio>,
    pub fetched_at: DateTime<Utc>,
    /// Latest game date across player and team rows.
    pub max_game_date: Option<NaiveDate>,
}

impl SeasonLogCache {
    pub fn new(
        season: &str,
        player_logs: Vec<GameLogRow>,
        team_logs: Vec<GameLogRow>,
        bios: Vec<PlayerBio>,
    ) -> Self {
        let max_game_date = player_logs
            .iter()
            .chain(team_logs.iter())
            .map(|r| r.game_date)
            .max();
        Self {
            season: season.to_string(),
            player_logs,
            team_logs,
            bios,
            fetched_at: Utc::now(),
            max_game_date,
        }
    }

    fn is_empty(&self) -> bool {
        self.player_logs.is_empty() && self.team_logs.is_empty()
    }
}

/// Result of `ensure_season_logs`. `stale` is set when upstream failed and the
/// last good copy was served instead.
#[derive(Debug, Clone)]
pub struct SeasonLogs {
    pub logs: Arc<SeasonLogCache>,
    pub stale: bool,
}

#[derive(Clone)]
struct Entry {
    cache: Arc<SeasonLogCache>,
    /// Soft invalidation: the entry is no longer served as fresh but stays
    /// available as the fallback copy.
    invalidated: bool,
}

// ---------------------------------------------------------------------------
// RawLogStore
// ---------------------------------------------------------------------------

pub struct RawLogStore {
    provider: Arc<dyn LogProvider>,
    archive: Option<SeasonLogArchive>,
    ttl: Duration,
    /// season → current log set. Readers clone the Arc; writers replace the entry.
    entries: DashMap<String, Entry>,
    /// season → fetch guard. Holders of the guard are the only ones going upstream.
    fetch_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    upstream_fetches: AtomicU64,
}

impl RawLogStore {
    pub fn new(
        provider: Arc<dyn LogProvider>,
        archive: Option<SeasonLogArchive>,
        ttl: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            archive,
            ttl,
            entries: DashMap::new(),
            fetch_locks: DashMap::new(),
            upstream_fetches: AtomicU64::new(0),
        })
    }

    /// Logs for `season` that cover games through `required_through`.
    ///
    /// Cached logs are served while they are not invalidated and either cover
    /// the date or were fetched within the TTL. Otherwise one caller goes
    /// upstream while concurrent callers for the same season wait and reuse
    /// its result. If upstream fails the last good copy is served as stale.
    pub async fn ensure_season_logs(
        &self,
        season: &str,
        required_through: NaiveDate,
    ) -> Result<SeasonLogs, EngineError> {
        if let Some(fresh) = self.fresh_entry(season, required_through) {
            return Ok(SeasonLogs { logs: fresh, stale: false });
        }

        let lock = self
            .fetch_locks
            .entry(season.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have fetched while we waited for the guard.
        if let Some(fresh) = self.fresh_entry(season, required_through) {
            return Ok(SeasonLogs { logs: fresh, stale: false });
        }

        if !self.entries.contains_key(season) {
            self.hydrate_from_archive(season).await;
            if let Some(fresh) = self.fresh_entry(season, required_through) {
                return Ok(SeasonLogs { logs: fresh, stale: false });
            }
        }

        let previous = self.entries.get(season).map(|e| e.cache.clone());
        match self.fetch_upstream(season, previous.as_deref()).await {
            Ok(fetched) => {
                let fetched = Arc::new(fetched);
                self.entries.insert(
                    season.to_string(),
                    Entry { cache: Arc::clone(&fetched), invalidated: false },
                );
                self.persist(&fetched).await;
                Ok(SeasonLogs { logs: fetched, stale: false })
            }
            Err(e) => match previous {
                Some(last_good) => {
                    warn!(
                        season,
                        fetched_at = %last_good.fetched_at,
                        "Upstream log fetch failed, serving cached copy: {e}"
                    );
                    Ok(SeasonLogs { logs: last_good, stale: true })
                }
                None => Err(e),
            },
        }
    }

    /// Mark the season's logs as needing a refetch. The current copy stays as
    /// the stale fallback. Returns false if nothing was cached.
    pub fn invalidate(&self, season: &str) -> bool {
        match self.entries.get_mut(season) {
            Some(mut entry) => {
                entry.invalidated = true;
                true
            }
            None => false,
        }
    }

    /// Whether logs newer than `logs_through` are, or may now be, available:
    /// the cached copy has moved past it, or it is no longer fresh for
    /// `required_through` so the next read would refetch.
    pub fn may_have_newer(
        &self,
        season: &str,
        required_through: NaiveDate,
        logs_through: Option<NaiveDate>,
    ) -> bool {
        match self.fresh_entry(season, required_through) {
            Some(cache) => cache.max_game_date > logs_through,
            None => true,
        }
    }

    /// Number of upstream fetch rounds started (each pulls player and team logs).
    pub fn upstream_fetches(&self) -> u64 {
        self.upstream_fetches.load(Ordering::Relaxed)
    }

    fn fresh_entry(&self, season: &str, required_through: NaiveDate) -> Option<Arc<SeasonLogCache>> {
        let entry = self.entries.get(season)?;
        if entry.invalidated {
            return None;
        }
        let covers = entry.cache.max_game_date.is_some_and(|d| d >= required_through);
        let age = Utc::now()
            .signed_duration_since(entry.cache.fetched_at)
            .to_std()
            .unwrap_or_default();
        (covers || age < self.ttl).then(|| Arc::clone(&entry.cache))
    }

    async fn hydrate_from_archive(&self, season: &str) {
        let Some(archive) = &self.archive else { return };
        match archive.load(season).await {
            Ok(Some(cache)) => {
                info!(
                    season,
                    player_rows = cache.player_logs.len(),
                    team_rows = cache.team_logs.len(),
                    "Loaded season logs from archive"
                );
                self.entries.insert(
                    season.to_string(),
                    Entry { cache: Arc::new(cache), invalidated: false },
                );
            }
            Ok(None) => {}
            Err(e) => warn!(season, "Season log archive read failed: {e}"),
        }
    }

    async fn fetch_upstream(
        &self,
        season: &str,
        previous: Option<&SeasonLogCache>,
    ) -> Result<SeasonLogCache, EngineError> {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        let upstream = |e: crate::error::AppError| EngineError::UpstreamFetch(e.to_string());

        let (player_logs, team_logs) = tokio::try_join!(
            self.provider.fetch_player_logs(season),
            self.provider.fetch_team_logs(season),
        )
        .map_err(upstream)?;

        let bios = match self.provider.fetch_player_bios(season).await {
            Ok(b) => b,
            Err(e) => {
                warn!(season, "Player bio fetch failed, keeping previous bios: {e}");
                previous.map(|p| p.bios.clone()).unwrap_or_default()
            }
        };

        let fetched = SeasonLogCache::new(season, player_logs, team_logs, bios);

        // An empty response after we already had rows is a provider hiccup, not a reset.
        if fetched.is_empty() && previous.is_some_and(|p| !p.is_empty()) {
            return Err(EngineError::UpstreamFetch(format!(
                "provider returned no logs for season {season}"
            )));
        }

        info!(
            season,
            player_rows = fetched.player_logs.len(),
            team_rows = fetched.team_logs.len(),
            max_game_date = ?fetched.max_game_date,
            "Season logs fetched"
        );
        Ok(fetched)
    }

    async fn persist(&self, cache: &SeasonLogCache) {
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.save(cache).await {
                warn!(season = %cache.season, "Season log archive write failed: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
