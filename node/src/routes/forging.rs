use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use forgechain::consensus::{ConsensusVariant, ForgerStatus};
use forgechain::AccountId;

use super::{ApiError, bad_request, blocking, internal};
use crate::state::SharedState;

/// Request body for `POST /forging/start`.
///
/// Stake chains need `secretPhrase`; agreement chains take `vote` and
/// `actor` (or keep the ones set earlier); work chains need nothing.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartForgingRequest {
    pub secret_phrase: Option<String>,
    pub vote: Option<String>,
    pub actor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartForgingResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountId>,
    #[serde(flatten)]
    pub status: ForgerStatus,
}

/// `POST /forging/start`
pub async fn start(
    State(state): State<SharedState>,
    Json(body): Json<StartForgingRequest>,
) -> Result<(StatusCode, Json<StartForgingResponse>), ApiError> {
    let forger = state.forger.clone();
    let account = match forger.variant() {
        ConsensusVariant::Stake => {
            let phrase = body
                .secret_phrase
                .filter(|p| !p.is_empty())
                .ok_or_else(|| bad_request("secretPhrase is required on a stake chain"))?;
            Some(forger.add_generator(&phrase))
        }
        ConsensusVariant::Agreement => {
            match (body.vote, body.actor) {
                (Some(vote), Some(actor)) => forger
                    .set_agreement(vote, actor)
                    .map_err(|e| bad_request(e.to_string()))?,
                (None, None) if forger.status().vote.is_some() => {}
                _ => return Err(bad_request("vote and actor are required")),
            }
            forger.start_mining();
            None
        }
        ConsensusVariant::Work => {
            forger.start_mining();
            None
        }
    };

    Ok((
        StatusCode::OK,
        Json(StartForgingResponse {
            account,
            status: forger.status(),
        }),
    ))
}

/// Request body for `POST /forging/stop`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StopForgingRequest {
    /// Generator to remove. Without it, mining stops.
    pub secret_phrase: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopForgingResponse {
    pub stopped: bool,
    #[serde(flatten)]
    pub status: ForgerStatus,
}

/// `POST /forging/stop`
pub async fn stop(
    State(state): State<SharedState>,
    body: Option<Json<StopForgingRequest>>,
) -> Json<StopForgingResponse> {
    let forger = &state.forger;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let stopped = match body.secret_phrase {
        Some(phrase) => forger.remove_generator(&phrase),
        None => {
            forger.stop_mining();
            true
        }
    };
    Json(StopForgingResponse {
        stopped,
        status: forger.status(),
    })
}

#[derive(Debug, Serialize)]
pub struct VoteCandidate {
    pub name: String,
    pub votes: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementResponse {
    /// Votes over the most recent half of the chain, most popular first.
    pub candidates: Vec<VoteCandidate>,
    pub from_height: u64,
    pub to_height: u64,
    pub vote: Option<String>,
    pub actor: Option<String>,
    pub forging: bool,
}

/// `GET /agreement`
pub async fn agreement(
    State(state): State<SharedState>,
) -> Result<Json<AgreementResponse>, ApiError> {
    let ctx = state.ctx.clone();
    let tally = blocking(move || ctx.lock().tally_votes())
        .await?
        .map_err(|e| internal(format!("vote tally failed: {e}")))?;

    let status = state.forger.status();
    Ok(Json(AgreementResponse {
        candidates: tally
            .counts
            .into_iter()
            .map(|(name, votes)| VoteCandidate { name, votes })
            .collect(),
        from_height: tally.from_height,
        to_height: tally.to_height,
        vote: status.vote,
        actor: status.actor,
        forging: status.forging,
    }))
}
