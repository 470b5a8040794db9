use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Malformed upstream payload: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failures of the snapshot engine itself. `Clone` so a single failed
/// computation can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Provider unreachable or returned malformed data, and no cached copy exists.
    #[error("upstream unavailable: {0}")]
    UpstreamFetch(String),

    /// Nothing to compute from yet (no logs, no games). Distinct from upstream failure.
    #[error("no data: {0}")]
    NoData(String),

    #[error("computation exceeded {}s", .0.as_secs())]
    ComputationTimeout(Duration),

    /// Snapshot computed but could not be persisted.
    #[error("snapshot store write failed: {0}")]
    StoreWrite(String),

    /// The computation task ended without producing an outcome (panic or shutdown).
    #[error("computation aborted: {0}")]
    Aborted(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Engine(EngineError::UpstreamFetch(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Engine(EngineError::NoData(_)) => StatusCode::NOT_FOUND,
            AppError::Engine(EngineError::ComputationTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
