use axum::{Json, extract::State};
use tracing::debug;

use forgechain::net::{PeerRequest, PeerResponse, answer};

use super::{ApiError, blocking};
use crate::state::SharedState;

/// `POST /peer`
///
/// Serves the peer protocol: the body is a [`PeerRequest`] tagged by
/// `requestType`, the reply a [`PeerResponse`] tagged by `responseType`.
/// Protocol-level refusals are regular responses, so this only fails when
/// the handler task itself does.
pub async fn peer(
    State(state): State<SharedState>,
    Json(request): Json<PeerRequest>,
) -> Result<Json<PeerResponse>, ApiError> {
    debug!(request = request.name(), "peer request");
    let response = blocking(move || {
        let net = state.ctx.config().net.clone();
        state.ctx.with_chain(|chain| answer(chain, &net, request))
    })
    .await?;
    Ok(Json(response))
}
