use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::health::EngineStats;
use crate::api::latency::LatencyStats;
use crate::db::SnapshotStore;
use crate::error::EngineError;
use crate::pipeline::{MatchupPipeline, ServedCard};
use crate::types::{
    as_of_date_for_slate, season_label_for_date, MatchupSnapshot, SnapshotKey, Window,
};

// ---------------------------------------------------------------------------
// Served results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrigin {
    /// Read straight from the snapshot store.
    Cached,
    /// Computed for this request and stored.
    Computed,
    /// Computed, but the store write failed; the next read recomputes.
    Uncached,
    /// Upstream was unavailable: either the last stored payload or one built
    /// from the cached raw logs. Never stored; the next read retries.
    StaleFallback,
}

#[derive(Debug, Clone)]
pub struct ServedSnapshot {
    pub snapshot: Arc<MatchupSnapshot>,
    pub origin: SnapshotOrigin,
}

type Outcome = Result<ServedSnapshot, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub slate_date: NaiveDate,
    pub cleared_keys: usize,
    pub recomputed: bool,
    /// A recomputed window could only be served from stale data.
    pub stale: bool,
}

// ---------------------------------------------------------------------------
// Per-key state
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum KeyState {
    /// One computation in flight; late callers subscribe to its outcome.
    Computing(watch::Receiver<Option<Outcome>>),
    /// Store holds a current payload.
    Ready,
    /// Store payload is invalidated but kept as fallback.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Absent,
    Computing,
    Ready,
    Stale,
}

enum CachedRead {
    Hit(ServedSnapshot),
    Miss,
    /// Stored, but newer game logs are or may be available.
    Outdated,
}

enum Claim {
    Join(watch::Receiver<Option<Outcome>>),
    Start(watch::Receiver<Option<Outcome>>, watch::Sender<Option<Outcome>>),
    /// The key turned ready after our store read; read again.
    Reread,
}

/// Removes a `Computing` entry if the task owning it ends without reporting.
struct ComputingGuard {
    controller: Arc<RefreshController>,
    key: SnapshotKey,
    armed: bool,
}

impl Drop for ComputingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.controller
                .states
                .remove_if(&self.key, |_, s| matches!(s, KeyState::Computing(_)));
        }
    }
}

// ---------------------------------------------------------------------------
// RefreshController
// ---------------------------------------------------------------------------

/// Read-through access to matchup snapshots with at most one computation per
/// key. A computation runs on its own task so it finishes (and is stored)
/// even when every caller waiting on it goes away.
pub struct RefreshController {
    pipeline: MatchupPipeline,
    store: Arc<dyn SnapshotStore>,
    states: DashMap<SnapshotKey, KeyState>,
    compute_timeout: Duration,
    stats: Arc<EngineStats>,
    latency: Arc<LatencyStats>,
}

impl RefreshController {
    pub fn new(
        pipeline: MatchupPipeline,
        store: Arc<dyn SnapshotStore>,
        compute_timeout: Duration,
        stats: Arc<EngineStats>,
        latency: Arc<LatencyStats>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            store,
            states: DashMap::new(),
            compute_timeout,
            stats,
            latency,
        })
    }

    pub fn status(&self, key: SnapshotKey) -> KeyStatus {
        match self.states.get(&key).as_deref() {
            None => KeyStatus::Absent,
            Some(KeyState::Computing(_)) => KeyStatus::Computing,
            Some(KeyState::Ready) => KeyStatus::Ready,
            Some(KeyState::Stale) => KeyStatus::Stale,
        }
    }

    pub fn upstream_log_fetches(&self) -> u64 {
        self.pipeline.log_store().upstream_fetches()
    }

    /// Stored snapshot if current, otherwise computes it (or joins the
    /// computation already running for the key).
    pub async fn get_matchups(
        self: &Arc<Self>,
        slate_date: NaiveDate,
        window: Window,
    ) -> Result<ServedSnapshot, EngineError> {
        let key = SnapshotKey::new(slate_date, window);
        let mut reread = false;

        loop {
            let current = self.states.get(&key).map(|s| s.value().clone());
            match current {
                Some(KeyState::Computing(rx)) => return wait_for_outcome(rx).await,
                Some(KeyState::Stale) => {}
                Some(KeyState::Ready) | None => match self.read_cached(key).await {
                    CachedRead::Hit(served) => return Ok(served),
                    CachedRead::Outdated => reread = true,
                    CachedRead::Miss => {}
                },
            }

            match self.claim(key, reread) {
                Claim::Join(rx) => return wait_for_outcome(rx).await,
                Claim::Start(rx, tx) => {
                    self.spawn_computation(key, tx);
                    return wait_for_outcome(rx).await;
                }
                Claim::Reread => reread = true,
            }
        }
    }

    /// Invalidate both windows of a slate. With `recompute` the season's raw
    /// logs are refetched and both windows are rebuilt before returning.
    pub async fn refresh(
        self: &Arc<Self>,
        slate_date: NaiveDate,
        recompute: bool,
    ) -> Result<RefreshOutcome, EngineError> {
        if recompute {
            self.invalidate_raw_logs(slate_date);
        }

        let mut cleared_keys = 0;
        for window in Window::ALL {
            if self.invalidate_key(SnapshotKey::new(slate_date, window)).await? {
                cleared_keys += 1;
            }
        }

        let mut stale = false;
        if recompute {
            let results = join_all(Window::ALL.map(|w| self.get_matchups(slate_date, w))).await;
            for result in results {
                stale |= result?.origin == SnapshotOrigin::StaleFallback;
            }
        }

        info!(slate_date = %slate_date, cleared_keys, recompute, stale, "Slate refreshed");
        Ok(RefreshOutcome {
            slate_date,
            cleared_keys,
            recomputed: recompute,
            stale,
        })
    }

    /// Invalidate one key. The other window of the slate is untouched.
    pub async fn refresh_window(
        self: &Arc<Self>,
        key: SnapshotKey,
        recompute: bool,
    ) -> Result<RefreshOutcome, EngineError> {
        if recompute {
            self.invalidate_raw_logs(key.slate_date);
        }
        let cleared = self.invalidate_key(key).await?;

        let mut stale = false;
        if recompute {
            let served = self.get_matchups(key.slate_date, key.window).await?;
            stale = served.origin == SnapshotOrigin::StaleFallback;
        }

        info!(key = %key, cleared, recompute, stale, "Window refreshed");
        Ok(RefreshOutcome {
            slate_date: key.slate_date,
            cleared_keys: usize::from(cleared),
            recomputed: recompute,
            stale,
        })
    }

    /// Player card for the slate's window, bounded by the computation timeout.
    pub async fn player_card(
        &self,
        player_id: u64,
        slate_date: NaiveDate,
        window: Window,
    ) -> Result<ServedCard, EngineError> {
        let served = tokio::time::timeout(
            self.compute_timeout,
            self.pipeline.player_card(player_id, slate_date, window),
        )
        .await
        .map_err(|_| EngineError::ComputationTimeout(self.compute_timeout))??;
        if served.stale_inputs {
            self.stats.inc_stale_serves();
            warn!(player_id, slate_date = %slate_date, "Player card built from cached logs, upstream unavailable");
        }
        Ok(served)
    }

    fn invalidate_raw_logs(&self, slate_date: NaiveDate) {
        let season = season_label_for_date(slate_date);
        if self.pipeline.log_store().invalidate(&season) {
            info!(season = %season, "Raw logs invalidated");
        }
    }

    /// Let any in-flight computation land first so its `put` cannot overwrite
    /// the invalidation.
    async fn invalidate_key(&self, key: SnapshotKey) -> Result<bool, EngineError> {
        loop {
            let in_flight = match self.states.get(&key).as_deref() {
                Some(KeyState::Computing(rx)) => Some(rx.clone()),
                _ => None,
            };
            match in_flight {
                Some(rx) => {
                    let _ = wait_for_outcome(rx).await;
                }
                None => break,
            }
        }

        let invalidated = self
            .store
            .invalidate(key)
            .await
            .map_err(|e| EngineError::StoreWrite(e.to_string()))?;

        match self.states.entry(key) {
            Entry::Occupied(mut e) => {
                if !matches!(e.get(), KeyState::Computing(_)) {
                    e.insert(KeyState::Stale);
                }
            }
            Entry::Vacant(e) => {
                if invalidated {
                    e.insert(KeyState::Stale);
                }
            }
        }
        Ok(invalidated)
    }

    async fn read_cached(&self, key: SnapshotKey) -> CachedRead {
        match self.store.get(key).await {
            Ok(Some(snapshot)) if self.behind_logs(&snapshot) => {
                info!(
                    key = %key,
                    as_of = %snapshot.as_of_date,
                    logs_through = ?snapshot.logs_through,
                    "Stored snapshot predates newer game logs, recomputing"
                );
                CachedRead::Outdated
            }
            Ok(Some(snapshot)) => {
                self.stats.inc_cache_hits();
                self.states.entry(key).or_insert(KeyState::Ready);
                CachedRead::Hit(ServedSnapshot {
                    snapshot: Arc::new(snapshot),
                    origin: SnapshotOrigin::Cached,
                })
            }
            Ok(None) => CachedRead::Miss,
            Err(e) => {
                warn!(key = %key, "Snapshot read failed, recomputing: {e}");
                CachedRead::Miss
            }
        }
    }

    /// A snapshot built before its cutoff's games were in the logs is final
    /// only while the log store has nothing newer to offer.
    fn behind_logs(&self, snapshot: &MatchupSnapshot) -> bool {
        let cutoff = as_of_date_for_slate(snapshot.slate_date);
        if snapshot.games.is_empty() || snapshot.logs_through.is_some_and(|d| d >= cutoff) {
            return false;
        }
        let season = season_label_for_date(snapshot.slate_date);
        self.pipeline
            .log_store()
            .may_have_newer(&season, cutoff, snapshot.logs_through)
    }

    fn claim(&self, key: SnapshotKey, reread: bool) -> Claim {
        let (tx, rx) = watch::channel(None);
        match self.states.entry(key) {
            Entry::Occupied(mut e) => {
                match e.get() {
                    KeyState::Computing(running) => return Claim::Join(running.clone()),
                    KeyState::Ready if !reread => return Claim::Reread,
                    KeyState::Ready | KeyState::Stale => {}
                }
                e.insert(KeyState::Computing(rx.clone()));
            }
            Entry::Vacant(e) => {
                e.insert(KeyState::Computing(rx.clone()));
            }
        }
        Claim::Start(rx, tx)
    }

    fn spawn_computation(self: &Arc<Self>, key: SnapshotKey, tx: watch::Sender<Option<Outcome>>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut guard = ComputingGuard {
                controller: Arc::clone(&controller),
                key,
                armed: true,
            };
            controller.stats.inc_computations();
            let started = Instant::now();

            let outcome = match tokio::time::timeout(controller.compute_timeout, controller.compute_and_store(key)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(EngineError::ComputationTimeout(controller.compute_timeout)),
            };
            controller.latency.record(started.elapsed());

            match &outcome {
                Ok(served) => match served.origin {
                    SnapshotOrigin::Computed | SnapshotOrigin::Cached => {
                        controller.states.insert(key, KeyState::Ready);
                    }
                    SnapshotOrigin::StaleFallback => {
                        controller.states.insert(key, KeyState::Stale);
                    }
                    SnapshotOrigin::Uncached => {
                        controller.states.remove(&key);
                    }
                },
                Err(e) => {
                    controller.stats.inc_computation_failures();
                    warn!(key = %key, "Snapshot computation failed: {e}");
                    controller.states.remove(&key);
                }
            }
            guard.armed = false;
            let _ = tx.send(Some(outcome));
        });
    }

    async fn compute_and_store(&self, key: SnapshotKey) -> Outcome {
        let computed = match self.pipeline.compute(key).await {
            Ok(c) => c,
            Err(EngineError::UpstreamFetch(reason)) => return self.stale_fallback(key, reason).await,
            Err(e) => return Err(e),
        };

        if computed.stale_inputs {
            self.stats.inc_stale_serves();
            warn!(key = %key, "Raw logs unavailable upstream, serving snapshot built from cached logs");
            return Ok(ServedSnapshot {
                snapshot: Arc::new(computed.snapshot),
                origin: SnapshotOrigin::StaleFallback,
            });
        }

        let mut snapshot = computed.snapshot;
        if snapshot.games.is_empty() {
            if let Ok(Some(previous)) = self.store.last_known(key).await {
                if !previous.games.is_empty() {
                    warn!(
                        key = %key,
                        previous_games = previous.games.len(),
                        "Recompute produced an empty slate, keeping previous snapshot"
                    );
                    snapshot = previous;
                }
            }
        }

        let origin = match self.store.put(key, &snapshot).await {
            Ok(()) => SnapshotOrigin::Computed,
            Err(e) => {
                self.stats.inc_store_write_failures();
                warn!(key = %key, "{}", EngineError::StoreWrite(e.to_string()));
                SnapshotOrigin::Uncached
            }
        };

        Ok(ServedSnapshot {
            snapshot: Arc::new(snapshot),
            origin,
        })
    }

    async fn stale_fallback(&self, key: SnapshotKey, reason: String) -> Outcome {
        match self.store.last_known(key).await {
            Ok(Some(previous)) => {
                self.stats.inc_stale_serves();
                warn!(key = %key, "Upstream unavailable, serving last stored snapshot: {reason}");
                Ok(ServedSnapshot {
                    snapshot: Arc::new(previous),
                    origin: SnapshotOrigin::StaleFallback,
                })
            }
            Ok(None) => Err(EngineError::UpstreamFetch(reason)),
            Err(e) => {
                warn!(key = %key, "Fallback snapshot read failed: {e}");
                Err(EngineError::UpstreamFetch(reason))
            }
        }
    }
}

async fn wait_for_outcome(mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome
            .clone()
            .unwrap_or_else(|| Err(EngineError::Aborted("empty outcome".into()))),
        Err(_) => Err(EngineError::Aborted("computation task ended without a result".into())),
    }
}
