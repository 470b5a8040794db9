use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::health::{EngineStats, EngineStatsSnapshot};
use crate::api::latency::LatencyStats;
use crate::error::AppError;
use crate::refresh::{KeyStatus, RefreshController, RefreshOutcome, SnapshotOrigin};
use crate::types::{
    current_et_date, season_bounds, season_label_for_date, MatchupSnapshot, PlayerCard, SnapshotKey,
    Window,
};

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<RefreshController>,
    pub stats: Arc<EngineStats>,
    pub latency: Arc<LatencyStats>,
    /// Default for `recompute` when the refresh request omits it.
    pub eager_refresh: bool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/matchups", get(get_matchups))
        .route("/api/refresh", post(post_refresh))
        .route("/api/player-card", get(get_player_card))
        .route("/api/status", get(get_status))
        .route("/api/meta", get(get_meta))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct MatchupsQuery {
    /// Slate date; defaults to today in US Eastern time.
    pub date: Option<NaiveDate>,
    pub window: Option<Window>,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct RefreshQuery {
    pub date: NaiveDate,
    pub recompute: Option<bool>,
    /// Refresh only this window; both when omitted.
    pub window: Option<Window>,
}

#[derive(Deserialize)]
pub struct PlayerCardQuery {
    pub player_id: u64,
    pub date: Option<NaiveDate>,
    pub window: Option<Window>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct MatchupResponse {
    #[serde(flatten)]
    pub snapshot: MatchupSnapshot,
    pub origin: SnapshotOrigin,
}

#[derive(Serialize)]
pub struct PlayerCardResponse {
    #[serde(flatten)]
    pub card: PlayerCard,
    pub stale: bool,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub slate_date: NaiveDate,
    pub season: KeyStatus,
    pub last10: KeyStatus,
}

#[derive(Serialize)]
pub struct MetaResponse {
    pub season_label: String,
    pub current_date_et: NaiveDate,
    pub season_start: NaiveDate,
    pub season_end: NaiveDate,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub upstream_log_fetches: u64,
    pub engine: EngineStatsSnapshot,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_matchups(
    State(state): State<ApiState>,
    Query(params): Query<MatchupsQuery>,
) -> Result<Json<MatchupResponse>, AppError> {
    let slate_date = params.date.unwrap_or_else(current_et_date);
    let window = params.window.unwrap_or(Window::Season);

    let served = state.controller.get_matchups(slate_date, window).await?;
    Ok(Json(MatchupResponse {
        snapshot: Arc::unwrap_or_clone(served.snapshot),
        origin: served.origin,
    }))
}

async fn post_refresh(
    State(state): State<ApiState>,
    Query(params): Query<RefreshQuery>,
) -> Result<Json<RefreshOutcome>, AppError> {
    let recompute = params.recompute.unwrap_or(state.eager_refresh);
    let outcome = match params.window {
        Some(window) => {
            state
                .controller
                .refresh_window(SnapshotKey::new(params.date, window), recompute)
                .await?
        }
        None => state.controller.refresh(params.date, recompute).await?,
    };
    Ok(Json(outcome))
}

async fn get_player_card(
    State(state): State<ApiState>,
    Query(params): Query<PlayerCardQuery>,
) -> Result<Json<PlayerCardResponse>, AppError> {
    let slate_date = params.date.unwrap_or_else(current_et_date);
    let window = params.window.unwrap_or(Window::Season);

    let served = state
        .controller
        .player_card(params.player_id, slate_date, window)
        .await?;
    Ok(Json(PlayerCardResponse {
        card: served.card,
        stale: served.stale_inputs,
    }))
}

async fn get_status(
    State(state): State<ApiState>,
    Query(params): Query<StatusQuery>,
) -> Json<StatusResponse> {
    let slate_date = params.date.unwrap_or_else(current_et_date);
    let status = |window| state.controller.status(SnapshotKey::new(slate_date, window));
    Json(StatusResponse {
        slate_date,
        season: status(Window::Season),
        last10: status(Window::Last10),
    })
}

async fn get_meta() -> Result<Json<MetaResponse>, AppError> {
    let today = current_et_date();
    let season_label = season_label_for_date(today);
    let (season_start, season_end) = season_bounds(&season_label)
        .ok_or_else(|| AppError::Malformed(format!("bad season label {season_label}")))?;

    Ok(Json(MetaResponse {
        season_label,
        current_date_et: today,
        season_start,
        season_end,
    }))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        upstream_log_fetches: state.controller.upstream_log_fetches(),
        engine: state.stats.snapshot(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let percentiles = state.latency.percentiles();
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms: percentiles.map(|p| p.0),
        p95_ms: percentiles.map(|p| p.1),
        p99_ms: percentiles.map(|p| p.2),
        max_ms: percentiles.map(|p| p.3),
    })
}
