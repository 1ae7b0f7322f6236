//! HTTP [`PeerNetwork`] client.
//!
//! Every request is a `POST {peer}/peer` with the JSON-encoded
//! [`PeerRequest`] as body; the peer answers with a JSON [`PeerResponse`].
//!
//! The client uses the blocking `reqwest` client, so it must be created,
//! used and dropped on plain threads, never inside an async task.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use reqwest::blocking::Client;
use tracing::debug;

use super::{NetConfig, NetError, PeerId, PeerInfo, PeerNetwork, PeerRequest, PeerResponse};

/// Peer network over a static, weighted peer list.
pub struct HttpPeerNetwork {
    client: Client,
    peers: Vec<PeerInfo>,
    blacklist: Mutex<HashMap<PeerId, String>>,
}

impl HttpPeerNetwork {
    pub fn new(cfg: &NetConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| NetError::Client(format!("failed to build HTTP client: {e}")))?;

        let peers = cfg
            .peers
            .iter()
            .map(|p| PeerInfo {
                id: PeerId(p.url.trim_end_matches('/').to_string()),
                weight: p.weight,
            })
            .collect();

        Ok(Self {
            client,
            peers,
            blacklist: Mutex::new(HashMap::new()),
        })
    }

    /// Blacklisted peers with the reason each was blacklisted for.
    pub fn blacklisted(&self) -> Vec<(PeerId, String)> {
        let mut list: Vec<_> = self
            .lock_blacklist()
            .iter()
            .map(|(p, r)| (p.clone(), r.clone()))
            .collect();
        list.sort();
        list
    }

    fn lock_blacklist(&self) -> MutexGuard<'_, HashMap<PeerId, String>> {
        self.blacklist.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn endpoint(peer: &PeerId) -> String {
    format!("{}/peer", peer.0.trim_end_matches('/'))
}

impl PeerNetwork for HttpPeerNetwork {
    fn peers(&self) -> Vec<PeerInfo> {
        let blacklist = self.lock_blacklist();
        self.peers
            .iter()
            .filter(|p| !blacklist.contains_key(&p.id))
            .cloned()
            .collect()
    }

    fn request(&self, peer: &PeerId, request: &PeerRequest) -> Result<PeerResponse, NetError> {
        if !self.peers.iter().any(|p| &p.id == peer) {
            return Err(NetError::UnknownPeer(peer.clone()));
        }
        let url = endpoint(peer);
        debug!(peer = %peer, request = request.name(), "sending peer request");

        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .map_err(|e| NetError::Transport {
                peer: peer.clone(),
                reason: format!("HTTP POST {url} failed: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::Transport {
                peer: peer.clone(),
                reason: format!("HTTP status {status}"),
            });
        }

        resp.json::<PeerResponse>().map_err(|e| NetError::PeerMisbehavior {
            peer: peer.clone(),
            reason: format!("unparsable {} response: {e}", request.name()),
        })
    }

    fn blacklist(&self, peer: &PeerId, reason: &str) {
        self.lock_blacklist().insert(peer.clone(), reason.to_string());
    }
}
