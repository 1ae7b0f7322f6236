//! Push of freshly accepted blocks to peers.
//!
//! The processor only announces pushed blocks through its
//! [`ChainEvent::BlockPushed`](crate::consensus::ChainEvent) listeners,
//! which run under the chain lock. Listeners hand the block off (usually
//! over a channel) and a [`BlockPropagator`] sends it from outside the lock.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use tracing::debug;

use crate::time::Clock;
use crate::types::Block;

use super::{NetConfig, PeerNetwork, PeerRequest, PeerResponse};

pub struct BlockPropagator {
    network: Arc<dyn PeerNetwork>,
    clock: Arc<dyn Clock>,
    fanout: usize,
    max_age_secs: u64,
}

impl BlockPropagator {
    pub fn new(network: Arc<dyn PeerNetwork>, clock: Arc<dyn Clock>, cfg: &NetConfig) -> Self {
        Self {
            network,
            clock,
            fanout: cfg.propagation_fanout,
            max_age_secs: cfg.propagation_max_age_secs,
        }
    }

    /// Blocks replayed from storage or fetched during a sync are old news
    /// to the network and are not pushed.
    pub fn is_recent(&self, block: &Block) -> bool {
        block.timestamp().saturating_add(self.max_age_secs) >= self.clock.now()
    }

    /// Sends `block` to up to `fanout` peers, picked weighted at random.
    /// Returns how many of them accepted it.
    pub fn send_block(&self, block: &Block) -> usize {
        if !self.is_recent(block) {
            debug!(block = %block.id(), "not propagating an old block");
            return 0;
        }

        let peers = self.network.peers();
        let chosen = match peers.choose_multiple_weighted(&mut rand::rng(), self.fanout, |p| p.weight)
        {
            Ok(chosen) => chosen.cloned().collect::<Vec<_>>(),
            Err(e) => {
                debug!(error = %e, "no peers to propagate to");
                return 0;
            }
        };

        let request = PeerRequest::ProcessBlock {
            block: block.clone(),
        };
        let mut accepted = 0;
        for peer in &chosen {
            match self.network.request(&peer.id, &request) {
                Ok(PeerResponse::Accepted { accepted: true, .. }) => accepted += 1,
                Ok(PeerResponse::Accepted { error, .. }) => {
                    debug!(peer = %peer.id, block = %block.id(), ?error, "peer refused block");
                }
                Ok(other) => {
                    debug!(peer = %peer.id, response = ?other, "unexpected reply to processBlock");
                }
                Err(e) => debug!(peer = %peer.id, error = %e, "block propagation failed"),
            }
        }
        debug!(block = %block.id(), sent = chosen.len(), accepted, "block propagated");
        accepted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::config::ChainConfig;
    use crate::consensus::{ChainContext, ChainEvent, ChainProcessor, ForgeOutcome, Forger};
    use crate::net::{LoopbackNetwork, PeerId};
    use crate::storage::InMemoryBlockStore;
    use crate::test_support;

    struct Setup {
        forger: Forger,
        pushed: mpsc::Receiver<Block>,
        propagator: BlockPropagator,
        peer_ctx: Arc<ChainContext>,
        clock: Arc<crate::time::ManualClock>,
    }

    fn setup() -> Setup {
        let (peer, clock) = test_support::processor(test_support::work_config());
        let peer_ctx = Arc::new(ChainContext::new(peer, ChainConfig::default()));
        let network = Arc::new(LoopbackNetwork::new());
        network.add_peer(PeerId("peer-a".to_string()), peer_ctx.clone(), 1);

        let (tx, pushed) = mpsc::channel();
        let local = ChainProcessor::builder(
            test_support::work_config(),
            test_support::genesis_config(),
            Box::new(InMemoryBlockStore::new()),
        )
        .clock(clock.clone())
        .listener(ChainEvent::BlockPushed, move |block| {
            let _ = tx.send(block.clone());
        })
        .open()
        .unwrap();
        let ctx = Arc::new(ChainContext::new(local, ChainConfig::default()));

        let propagator = BlockPropagator::new(network, clock.clone(), &NetConfig::default());
        Setup {
            forger: Forger::new(ctx),
            pushed,
            propagator,
            peer_ctx,
            clock,
        }
    }

    fn forge_one(forger: &Forger) {
        forger.start_mining();
        for _ in 0..100 {
            match forger.tick().unwrap() {
                ForgeOutcome::Forged { .. } => return,
                _ => continue,
            }
        }
        panic!("no block after 100 ticks");
    }

    #[test]
    fn forged_block_lands_on_peer_chain() {
        let s = setup();
        forge_one(&s.forger);
        let block = s.pushed.try_recv().unwrap();

        assert_eq!(s.propagator.send_block(&block), 1);
        let head = s.peer_ctx.head_summary();
        assert_eq!(head.height, 1);
        assert_eq!(head.id, block.id());

        // A second send is a duplicate on the peer.
        assert_eq!(s.propagator.send_block(&block), 0);
        assert_eq!(s.peer_ctx.head_summary().height, 1);
    }

    #[test]
    fn old_blocks_are_not_sent() {
        let s = setup();
        forge_one(&s.forger);
        let block = s.pushed.try_recv().unwrap();

        s.clock.set(block.timestamp() + NetConfig::default().propagation_max_age_secs + 1);
        assert!(!s.propagator.is_recent(&block));
        assert_eq!(s.propagator.send_block(&block), 0);
        assert_eq!(s.peer_ctx.head_summary().height, 0);
    }

    #[test]
    fn no_peers_sends_nothing() {
        let s = setup();
        let propagator = BlockPropagator::new(
            Arc::new(LoopbackNetwork::new()),
            s.clock.clone(),
            &NetConfig::default(),
        );
        forge_one(&s.forger);
        let block = s.pushed.try_recv().unwrap();
        assert_eq!(propagator.send_block(&block), 0);
    }
}
