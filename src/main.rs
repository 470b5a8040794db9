mod aggregate;
mod api;
mod classifier;
mod config;
mod db;
mod error;
mod fetcher;
mod pipeline;
mod refresh;
mod scorer;
mod state;
mod types;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::EngineStats;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::classifier::ProfileClassifier;
use crate::config::{Config, StoreBackend};
use crate::db::{MemorySnapshotStore, SeasonLogArchive, SnapshotStore, SqliteSnapshotStore};
use crate::error::Result;
use crate::fetcher::{LogProvider, NbaStatsClient};
use crate::pipeline::MatchupPipeline;
use crate::refresh::RefreshController;
use crate::state::RawLogStore;
use crate::types::{current_et_date, Window};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Engine ---
    let provider: Arc<dyn LogProvider> = Arc::new(NbaStatsClient::new(&cfg)?);
    let logs = RawLogStore::new(
        Arc::clone(&provider),
        Some(SeasonLogArchive::new(pool.clone())),
        cfg.raw_log_ttl,
    );
    let stats = Arc::new(EngineStats::new());
    let latency = Arc::new(LatencyStats::new());

    let pipeline = MatchupPipeline::new(
        provider,
        logs,
        Arc::new(ProfileClassifier),
        Arc::clone(&stats),
        cfg.rotation_min_minutes,
    );
    let store: Arc<dyn SnapshotStore> = match cfg.snapshot_store {
        StoreBackend::Sqlite => Arc::new(SqliteSnapshotStore::new(pool)),
        StoreBackend::Memory => Arc::new(MemorySnapshotStore::new()),
    };
    let controller = RefreshController::new(
        pipeline,
        store,
        cfg.compute_timeout,
        Arc::clone(&stats),
        Arc::clone(&latency),
    );
    info!(
        rotation_min_minutes = cfg.rotation_min_minutes,
        raw_log_ttl_secs = cfg.raw_log_ttl.as_secs(),
        compute_timeout_secs = cfg.compute_timeout.as_secs(),
        eager_refresh = cfg.eager_refresh,
        snapshot_store = ?cfg.snapshot_store,
        "Matchup engine ready"
    );

    // Warm today's season snapshot so the first request does not pay for the fetch.
    let warm = Arc::clone(&controller);
    tokio::spawn(async move {
        let today = current_et_date();
        match warm.get_matchups(today, Window::Season).await {
            Ok(served) => info!(
                slate_date = %today,
                players = served.snapshot.players.len(),
                origin = ?served.origin,
                "Warm-up complete"
            ),
            Err(e) => warn!(slate_date = %today, "Warm-up failed: {e}"),
        }
    });

    // HTTP API server
    let api_state = ApiState {
        controller,
        stats,
        latency,
        eager_refresh: cfg.eager_refresh,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
