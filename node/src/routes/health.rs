use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use forgechain::HeadSummary;

use super::{ApiError, blocking};
use crate::state::SharedState;

/// Simple health-check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// `GET /health`
///
/// Returns a basic JSON document indicating liveness.
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub head: HeadSummary,
    pub pending_transactions: usize,
    pub forging: bool,
}

/// `GET /status`
pub async fn status(State(state): State<SharedState>) -> Result<Json<StatusResponse>, ApiError> {
    let response = blocking(move || StatusResponse {
        head: state.ctx.head_summary(),
        pending_transactions: state.ctx.pool().len(),
        forging: state.forger.is_forging(),
    })
    .await?;
    Ok(Json(response))
}
