//! Peer protocol.
//!
//! Peers exchange JSON requests tagged by `requestType`:
//!
//! ```json
//! { "requestType": "getMilestoneBlockIds", "lastBlockId": "1234" }
//! { "requestType": "getNextBlocks", "blockId": "1234" }
//! ```
//!
//! and answer with responses tagged by `responseType`. [`answer`] is the
//! server side, run under the chain lock. The client side is the
//! [`PeerNetwork`] collaborator, implemented over HTTP by
//! [`http::HttpPeerNetwork`] and in-process by [`loopback::LoopbackNetwork`],
//! and driven by the [`fork_resolver::ForkResolver`] (pull) and the
//! [`propagation::BlockPropagator`] (push of freshly accepted blocks).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::consensus::processor::ChainProcessor;
use crate::types::{Block, BlockId};

pub mod fork_resolver;
pub mod http;
pub mod loopback;
pub mod propagation;

pub use fork_resolver::{ForkOutcome, ForkResolver};
pub use http::HttpPeerNetwork;
pub use loopback::LoopbackNetwork;
pub use propagation::BlockPropagator;

/// Peer address, e.g. `http://10.0.0.2:8081`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A selectable peer and its selection weight.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub weight: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    tag = "requestType",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum PeerRequest {
    GetCumulativeDifficulty,
    /// Exactly one of the two ids is expected.
    GetMilestoneBlockIds {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_block_id: Option<BlockId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_milestone_block_id: Option<BlockId>,
    },
    GetNextBlockIds {
        block_id: BlockId,
    },
    GetNextBlocks {
        block_id: BlockId,
    },
    ProcessBlock {
        block: Block,
    },
}

impl PeerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            PeerRequest::GetCumulativeDifficulty => "getCumulativeDifficulty",
            PeerRequest::GetMilestoneBlockIds { .. } => "getMilestoneBlockIds",
            PeerRequest::GetNextBlockIds { .. } => "getNextBlockIds",
            PeerRequest::GetNextBlocks { .. } => "getNextBlocks",
            PeerRequest::ProcessBlock { .. } => "processBlock",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    tag = "responseType",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum PeerResponse {
    CumulativeDifficulty {
        #[serde(with = "crate::types::u128_string")]
        cumulative_difficulty: u128,
        height: u64,
    },
    MilestoneBlockIds {
        milestone_block_ids: Vec<BlockId>,
        /// The list reaches genesis, or the caller's last block is our head.
        last: bool,
    },
    NextBlockIds {
        next_block_ids: Vec<BlockId>,
    },
    NextBlocks {
        next_blocks: Vec<Block>,
    },
    Accepted {
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        error: String,
    },
}

/// Errors talking to a peer.
#[derive(Debug, Error)]
pub enum NetError {
    /// Connection, timeout or HTTP-level failure.
    #[error("transport error talking to {peer}: {reason}")]
    Transport { peer: PeerId, reason: String },
    /// The peer broke the protocol: too many items, unparsable data, ...
    #[error("peer {peer} misbehaved: {reason}")]
    PeerMisbehavior { peer: PeerId, reason: String },
    /// Well-formed, but not the response the request calls for.
    #[error("unexpected {got} response from {peer} to {request}")]
    UnexpectedResponse {
        peer: PeerId,
        request: &'static str,
        got: String,
    },
    /// The peer answered with an error.
    #[error("peer {peer} refused {request}: {reason}")]
    Refused {
        peer: PeerId,
        request: &'static str,
        reason: String,
    },
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("http client: {0}")]
    Client(String),
}

/// Network collaborator used by the fork resolver.
pub trait PeerNetwork: Send + Sync {
    /// Peers currently eligible for selection. Blacklisted peers are
    /// left out.
    fn peers(&self) -> Vec<PeerInfo>;

    fn request(&self, peer: &PeerId, request: &PeerRequest) -> Result<PeerResponse, NetError>;

    fn blacklist(&self, peer: &PeerId, reason: &str);
}

/// A statically configured peer.
#[derive(Clone, Debug, Deserialize)]
pub struct PeerConfig {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Peer networking and fork-checking configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub peers: Vec<PeerConfig>,
    pub request_timeout_ms: u64,
    /// A peer sending more milestone ids than this in one response is
    /// blacklisted.
    pub max_milestone_ids: usize,
    pub max_next_block_ids: usize,
    pub max_next_blocks: usize,
    /// How many milestone ids this node hands out per request.
    pub milestone_limit: usize,
    pub fork_check_interval_ms: u64,
    /// Peers each freshly pushed block is sent to.
    pub propagation_fanout: usize,
    /// Blocks older than this (by timestamp) are not pushed to peers.
    pub propagation_max_age_secs: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            request_timeout_ms: 5_000,
            max_milestone_ids: 20,
            max_next_block_ids: 1440,
            max_next_blocks: 720,
            milestone_limit: 10,
            fork_check_interval_ms: 5_000,
            propagation_fanout: 10,
            propagation_max_age_secs: 15,
        }
    }
}

impl NetConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn fork_check_interval(&self) -> Duration {
        Duration::from_millis(self.fork_check_interval_ms)
    }
}

/// Answers one peer request against the local chain.
///
/// The caller holds the chain lock.
pub fn answer(chain: &mut ChainProcessor, cfg: &NetConfig, request: PeerRequest) -> PeerResponse {
    match request {
        PeerRequest::GetCumulativeDifficulty => {
            let head = chain.head();
            PeerResponse::CumulativeDifficulty {
                cumulative_difficulty: head.cumulative_difficulty(),
                height: head.height(),
            }
        }
        PeerRequest::GetMilestoneBlockIds {
            last_block_id,
            last_milestone_block_id,
        } => milestone_block_ids(chain, cfg, last_block_id, last_milestone_block_id),
        PeerRequest::GetNextBlockIds { block_id } => PeerResponse::NextBlockIds {
            next_block_ids: chain.chain().ids_after(block_id, cfg.max_next_block_ids),
        },
        PeerRequest::GetNextBlocks { block_id } => next_blocks(chain, cfg, block_id),
        PeerRequest::ProcessBlock { block } => match chain.push_block(block) {
            Ok(()) => PeerResponse::Accepted {
                accepted: true,
                error: None,
            },
            Err(e) => {
                if e.is_fatal() {
                    error!(error = %e, "fatal error processing peer block");
                }
                PeerResponse::Accepted {
                    accepted: false,
                    error: Some(e.to_string()),
                }
            }
        },
    }
}

/// Milestones step down from the caller's position towards genesis.
///
/// Starting from our head the step is 10 blocks. Continuing below a
/// milestone the caller did not recognise, the step grows with the
/// distance to our head, capped at 1440.
fn milestone_block_ids(
    chain: &ChainProcessor,
    cfg: &NetConfig,
    last_block_id: Option<BlockId>,
    last_milestone_block_id: Option<BlockId>,
) -> PeerResponse {
    let index = chain.chain();
    let head = chain.head();

    let (start, jump) = match (last_block_id, last_milestone_block_id) {
        (_, Some(milestone)) => {
            let Some(height) = index.height_of(milestone) else {
                return PeerResponse::Error {
                    error: format!("milestone block {milestone} is not canonical here"),
                };
            };
            let jump = head.height().saturating_sub(height).clamp(1, 1440);
            (height.saturating_sub(jump), jump)
        }
        (Some(last), None) => {
            if index.contains(last) {
                return PeerResponse::MilestoneBlockIds {
                    milestone_block_ids: vec![last],
                    last: last == head.id(),
                };
            }
            (head.height(), 10)
        }
        (None, None) => {
            warn!("milestone request without a starting block");
            return PeerResponse::Error {
                error: "lastBlockId or lastMilestoneBlockId required".to_string(),
            };
        }
    };

    let mut ids = Vec::new();
    let mut last = false;
    let mut height = start;
    while ids.len() < cfg.milestone_limit.max(1) {
        let Some(id) = index.id_at(height) else {
            break;
        };
        ids.push(id);
        if height == 0 {
            last = true;
            break;
        }
        height = height.saturating_sub(jump);
    }
    PeerResponse::MilestoneBlockIds {
        milestone_block_ids: ids,
        last,
    }
}

fn next_blocks(chain: &ChainProcessor, cfg: &NetConfig, block_id: BlockId) -> PeerResponse {
    let ids = chain.chain().ids_after(block_id, cfg.max_next_blocks);
    let mut next_blocks = Vec::with_capacity(ids.len());
    for id in ids {
        match chain.block(id) {
            Ok(Some(block)) => next_blocks.push(block),
            Ok(None) => {
                error!(id = %id, "canonical block missing from storage");
                return PeerResponse::Error {
                    error: format!("block {id} unavailable"),
                };
            }
            Err(e) => {
                error!(id = %id, error = %e, "failed to load block for peer");
                return PeerResponse::Error {
                    error: e.to_string(),
                };
            }
        }
    }
    PeerResponse::NextBlocks { next_blocks }
}
