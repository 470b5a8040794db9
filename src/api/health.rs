//! Engine counters for the /health endpoint.
//! Updated by the pipeline and the refresh controller.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct EngineStats {
    /// Snapshot computations started (one per key per recompute).
    pub computations: AtomicU64,
    /// Full window aggregation passes over the raw logs.
    pub aggregation_passes: AtomicU64,
    /// Reads answered from the snapshot store without computing.
    pub cache_hits: AtomicU64,
    /// Reads answered from an invalidated snapshot after a failed recompute.
    pub stale_serves: AtomicU64,
    pub store_write_failures: AtomicU64,
    pub computation_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub computations: u64,
    pub aggregation_passes: u64,
    pub cache_hits: u64,
    pub stale_serves: u64,
    pub store_write_failures: u64,
    pub computation_failures: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_computations(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_aggregation_passes(&self) {
        self.aggregation_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stale_serves(&self) {
        self.stale_serves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_write_failures(&self) {
        self.store_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_computation_failures(&self) {
        self.computation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn aggregation_passes(&self) -> u64 {
        self.aggregation_passes.load(Ordering::Relaxed)
    }

    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            computations: self.computations.load(Ordering::Relaxed),
            aggregation_passes: self.aggregation_passes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            stale_serves: self.stale_serves.load(Ordering::Relaxed),
            store_write_failures: self.store_write_failures.load(Ordering::Relaxed),
            computation_failures: self.computation_failures.load(Ordering::Relaxed),
        }
    }
}
