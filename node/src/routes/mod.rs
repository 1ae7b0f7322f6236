//! HTTP handlers.
//!
//! The chain sits behind a `std::sync::Mutex` that fork switching and
//! rescans may hold for a long time, so every handler that touches it runs
//! on the blocking pool via [`blocking`].

use axum::http::StatusCode;

pub mod blocks;
pub mod forging;
pub mod health;
pub mod peer;
pub mod transactions;

/// Error half of every handler result.
pub type ApiError = (StatusCode, String);

/// Runs `f` on the blocking thread pool.
pub async fn blocking<R, F>(f: F) -> Result<R, ApiError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| internal(format!("handler task failed: {e}")))
}

pub fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, msg.into())
}

pub fn internal(msg: impl Into<String>) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, msg.into())
}
