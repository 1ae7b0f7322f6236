use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use forgechain::{Transaction, TxId};

use super::{ApiError, bad_request, blocking};
use crate::state::SharedState;

/// Response body for `POST /transactions`.
#[derive(Debug, Serialize)]
pub struct SubmitTransactionResponse {
    pub status: &'static str,
    pub id: TxId,
}

/// `POST /transactions`
///
/// Validates a signed transaction against the ledger and queues it in the
/// pending pool. The forger picks it up for the next block.
pub async fn submit(
    State(state): State<SharedState>,
    Json(tx): Json<Transaction>,
) -> Result<(StatusCode, Json<SubmitTransactionResponse>), ApiError> {
    if !tx.verify_signature() {
        return Err(bad_request("invalid transaction signature"));
    }
    let id = tx.id();
    let ctx = state.ctx.clone();
    let added = blocking(move || ctx.submit_transaction(tx))
        .await?
        .map_err(|e| bad_request(e.to_string()))?;

    let status = if added { "queued" } else { "already pending" };
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTransactionResponse { status, id }),
    ))
}
