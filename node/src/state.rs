//! Shared application state.

use std::sync::Arc;

use forgechain::{ChainContext, Forger};

/// Shared state held by the API handlers and background tasks.
///
/// This is wrapped in an [`Arc`] and passed to request handlers via Axum's
/// `State` extractor.
pub struct AppState {
    /// Chain processor, pending pool and configuration.
    pub ctx: Arc<ChainContext>,
    /// Local block production, toggled over the forging API.
    pub forger: Arc<Forger>,
}

/// Thread-safe alias for `AppState`.
pub type SharedState = Arc<AppState>;
