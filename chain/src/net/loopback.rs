//! In-process [`PeerNetwork`].
//!
//! Each peer is another [`ChainContext`] in the same process. Requests and
//! responses still go through their JSON encoding, so the loopback
//! exercises the same codec as the HTTP transport.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::consensus::context::ChainContext;

use super::{NetError, PeerId, PeerInfo, PeerNetwork, PeerRequest, PeerResponse, answer};

struct LocalPeer {
    ctx: Arc<ChainContext>,
    weight: u32,
    blacklisted: Option<String>,
}

#[derive(Default)]
pub struct LoopbackNetwork {
    peers: Mutex<BTreeMap<PeerId, LocalPeer>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&self, id: PeerId, ctx: Arc<ChainContext>, weight: u32) {
        self.table().insert(
            id,
            LocalPeer {
                ctx,
                weight,
                blacklisted: None,
            },
        );
    }

    pub fn is_blacklisted(&self, id: &PeerId) -> bool {
        self.table()
            .get(id)
            .is_some_and(|p| p.blacklisted.is_some())
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<PeerId, LocalPeer>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PeerNetwork for LoopbackNetwork {
    fn peers(&self) -> Vec<PeerInfo> {
        self.table()
            .iter()
            .filter(|(_, p)| p.blacklisted.is_none())
            .map(|(id, p)| PeerInfo {
                id: id.clone(),
                weight: p.weight,
            })
            .collect()
    }

    fn request(&self, peer: &PeerId, request: &PeerRequest) -> Result<PeerResponse, NetError> {
        let ctx = self
            .table()
            .get(peer)
            .map(|p| p.ctx.clone())
            .ok_or_else(|| NetError::UnknownPeer(peer.clone()))?;

        let misbehaved = |e: serde_json::Error| NetError::PeerMisbehavior {
            peer: peer.clone(),
            reason: e.to_string(),
        };
        let encoded = serde_json::to_string(request).map_err(misbehaved)?;
        let request: PeerRequest = serde_json::from_str(&encoded).map_err(misbehaved)?;

        let net = ctx.config().net.clone();
        let response = ctx.with_chain(|chain| answer(chain, &net, request));

        let encoded = serde_json::to_string(&response).map_err(misbehaved)?;
        serde_json::from_str(&encoded).map_err(misbehaved)
    }

    fn blacklist(&self, peer: &PeerId, reason: &str) {
        if let Some(p) = self.table().get_mut(peer) {
            p.blacklisted = Some(reason.to_string());
        }
    }
}
