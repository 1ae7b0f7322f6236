//! Fork choice over the network.
//!
//! One [`ForkResolver::check_once`] round:
//!
//! 1. pick a peer, weighted at random, and ask for its cumulative
//!    difficulty; stop unless it beats the local head,
//! 2. exchange milestone ids until one is found on the local chain,
//! 3. walk next-block ids forward from it to pin the common block,
//! 4. fetch the peer's blocks after the common block and verify each
//!    against its already verified predecessor,
//! 5. switch to them if the last one is heavier than the local head.
//!
//! Requests go out without the chain lock. Verification and the switch
//! itself run under it. Misbehaving peers are blacklisted; nothing short of
//! a storage failure makes a round return an error.

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use tracing::{debug, info, warn};

use crate::consensus::context::ChainContext;
use crate::consensus::difficulty::Ancestry;
use crate::consensus::error::ChainError;
use crate::consensus::processor::{ChainProcessor, ForkSwitch};
use crate::metrics::ConsensusMetrics;
use crate::types::{Block, BlockId};

use super::{NetError, PeerId, PeerNetwork, PeerRequest, PeerResponse};

/// What a fork-check round ended with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ForkOutcome {
    NoPeers,
    /// The peer's chain is not heavier than ours.
    NotBetter { peer: PeerId },
    /// The peer offered nothing beyond blocks we already have.
    NothingToFetch { peer: PeerId },
    /// The peer could not be reached. It is not blacklisted.
    Unavailable { peer: PeerId, reason: String },
    /// The local chain moved while the round ran, or the fork's first
    /// block is not valid yet. Try again later.
    Deferred { peer: PeerId, reason: String },
    Blacklisted { peer: PeerId, reason: String },
    /// A fork block was refused on push. The local chain was restored and
    /// the peer blacklisted.
    Restored { peer: PeerId, reason: String },
    Switched {
        peer: PeerId,
        popped: usize,
        pushed: usize,
        height: u64,
    },
}

/// Early exit from a round.
enum Stop {
    Done(ForkOutcome),
    Failed(ChainError),
}

type Step<T> = Result<T, Stop>;

pub struct ForkResolver {
    ctx: Arc<ChainContext>,
    network: Arc<dyn PeerNetwork>,
    metrics: Option<Arc<ConsensusMetrics>>,
}

impl ForkResolver {
    pub fn new(ctx: Arc<ChainContext>, network: Arc<dyn PeerNetwork>) -> Self {
        Self {
            ctx,
            network,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ConsensusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs one round against a randomly chosen peer.
    pub fn check_once(&self) -> Result<ForkOutcome, ChainError> {
        let peers = self.network.peers();
        let Ok(peer) = peers.choose_weighted(&mut rand::rng(), |p| p.weight) else {
            return Ok(ForkOutcome::NoPeers);
        };
        self.sync_with(&peer.id)
    }

    /// Runs one round against `peer`.
    pub fn sync_with(&self, peer: &PeerId) -> Result<ForkOutcome, ChainError> {
        match self.round(peer) {
            Ok(outcome) | Err(Stop::Done(outcome)) => Ok(outcome),
            Err(Stop::Failed(e)) => Err(e),
        }
    }

    fn round(&self, peer: &PeerId) -> Step<ForkOutcome> {
        let local = self.ctx.head_summary().cumulative_difficulty;
        let remote = match self.ask(peer, PeerRequest::GetCumulativeDifficulty)? {
            PeerResponse::CumulativeDifficulty {
                cumulative_difficulty,
                ..
            } => cumulative_difficulty,
            other => return Err(self.unexpected(peer, "getCumulativeDifficulty", &other)),
        };
        if remote <= local {
            return Ok(ForkOutcome::NotBetter { peer: peer.clone() });
        }

        let milestone = self.common_milestone(peer)?;
        let common = self.common_block(peer, milestone)?;
        let blocks = self.next_blocks(peer, common)?;
        if blocks.is_empty() {
            return Ok(ForkOutcome::NothingToFetch { peer: peer.clone() });
        }
        debug!(peer = %peer, common = %common, blocks = blocks.len(), "downloaded candidate chain");

        let mut chain = self.ctx.lock();
        let fork = self.verify_fork(&chain, peer, common, blocks)?;
        self.apply_fork(&mut chain, peer, common, fork)
    }

    fn ask(&self, peer: &PeerId, request: PeerRequest) -> Step<PeerResponse> {
        let name = request.name();
        match self.network.request(peer, &request) {
            Ok(PeerResponse::Error { error }) => Err(Stop::Done(ForkOutcome::Unavailable {
                peer: peer.clone(),
                reason: format!("{name}: {error}"),
            })),
            Ok(response) => Ok(response),
            Err(NetError::PeerMisbehavior { reason, .. }) => Err(self.blacklist(peer, reason)),
            Err(e) => Err(Stop::Done(ForkOutcome::Unavailable {
                peer: peer.clone(),
                reason: e.to_string(),
            })),
        }
    }

    fn report(&self, peer: &PeerId, reason: &str) {
        warn!(peer = %peer, reason = %reason, "blacklisting peer");
        self.network.blacklist(peer, reason);
        if let Some(m) = &self.metrics {
            m.peers_blacklisted.inc();
        }
    }

    fn blacklist(&self, peer: &PeerId, reason: impl Into<String>) -> Stop {
        let reason = reason.into();
        self.report(peer, &reason);
        Stop::Done(ForkOutcome::Blacklisted {
            peer: peer.clone(),
            reason,
        })
    }

    /// Fatal errors end the round with an error. Anything else means the
    /// local chain moved under us.
    fn chain_error(&self, peer: &PeerId, e: ChainError) -> Stop {
        if e.is_fatal() {
            Stop::Failed(e)
        } else {
            Stop::Done(ForkOutcome::Deferred {
                peer: peer.clone(),
                reason: e.to_string(),
            })
        }
    }

    fn unexpected(&self, peer: &PeerId, request: &str, got: &PeerResponse) -> Stop {
        self.blacklist(peer, format!("answered {request} with {got:?}"))
    }

    /// Finds the newest milestone the peer and we both have.
    fn common_milestone(&self, peer: &PeerId) -> Step<BlockId> {
        let max_ids = self.ctx.config().net.max_milestone_ids;
        let mut request = PeerRequest::GetMilestoneBlockIds {
            last_block_id: Some(self.ctx.head_summary().id),
            last_milestone_block_id: None,
        };
        let mut seen = HashSet::new();

        loop {
            let (ids, last) = match self.ask(peer, request)? {
                PeerResponse::MilestoneBlockIds {
                    milestone_block_ids,
                    last,
                } => (milestone_block_ids, last),
                other => return Err(self.unexpected(peer, "getMilestoneBlockIds", &other)),
            };
            if ids.len() > max_ids {
                return Err(self.blacklist(
                    peer,
                    format!("sent {} milestone ids, limit {max_ids}", ids.len()),
                ));
            }
            let Some(&oldest) = ids.last() else {
                return Ok(self.genesis_id());
            };

            let known = {
                let chain = self.ctx.lock();
                ids.iter().copied().find(|id| chain.chain().contains(*id))
            };
            if let Some(id) = known {
                return Ok(id);
            }
            if last {
                return Err(self.blacklist(peer, "no common block with our chain"));
            }
            if !seen.insert(oldest) {
                return Err(self.blacklist(peer, format!("repeated milestone {oldest}")));
            }
            request = PeerRequest::GetMilestoneBlockIds {
                last_block_id: None,
                last_milestone_block_id: Some(oldest),
            };
        }
    }

    /// Walks forward from `milestone` to the last block both chains share.
    fn common_block(&self, peer: &PeerId, milestone: BlockId) -> Step<BlockId> {
        let max_ids = self.ctx.config().net.max_next_block_ids;
        let mut common = milestone;

        loop {
            let ids = match self.ask(peer, PeerRequest::GetNextBlockIds { block_id: common })? {
                PeerResponse::NextBlockIds { next_block_ids } => next_block_ids,
                other => return Err(self.unexpected(peer, "getNextBlockIds", &other)),
            };
            if ids.len() > max_ids {
                return Err(self.blacklist(
                    peer,
                    format!("sent {} next block ids, limit {max_ids}", ids.len()),
                ));
            }
            if ids.is_empty() {
                return Ok(common);
            }

            let chain = self.ctx.lock();
            let index = chain.chain();
            let from = index.height_of(common);
            for id in ids {
                match index.height_of(id) {
                    None => return Ok(common),
                    Some(height) if from.is_some_and(|f| height <= f) => {
                        return Err(self.blacklist(peer, format!("next block id {id} goes backwards")));
                    }
                    Some(_) => common = id,
                }
            }
        }
    }

    fn next_blocks(&self, peer: &PeerId, common: BlockId) -> Step<Vec<Block>> {
        let max_blocks = self.ctx.config().net.max_next_blocks;
        let blocks = match self.ask(peer, PeerRequest::GetNextBlocks { block_id: common })? {
            PeerResponse::NextBlocks { next_blocks } => next_blocks,
            other => return Err(self.unexpected(peer, "getNextBlocks", &other)),
        };
        if blocks.len() > max_blocks {
            return Err(self.blacklist(
                peer,
                format!("sent {} blocks, limit {max_blocks}", blocks.len()),
            ));
        }
        Ok(blocks)
    }

    /// Verifies each block against the one before it, starting at the
    /// common block. Stops early, keeping the verified prefix, at a block
    /// that is only not valid *yet*.
    fn verify_fork(
        &self,
        chain: &ChainProcessor,
        peer: &PeerId,
        common: BlockId,
        blocks: Vec<Block>,
    ) -> Step<Vec<Block>> {
        let deferred = |reason: String| {
            Stop::Done(ForkOutcome::Deferred {
                peer: peer.clone(),
                reason,
            })
        };
        if !chain.chain().contains(common) {
            return Err(deferred(format!("common block {common} is no longer canonical")));
        }
        let stored = chain.block(common).map_err(|e| self.chain_error(peer, e))?;
        let Some(mut previous) = stored else {
            return Err(deferred(format!("common block {common} not in storage")));
        };

        let engine = chain.engine();
        let now = self.ctx.now();
        let mut verified: Vec<Block> = Vec::with_capacity(blocks.len());
        for block in blocks {
            let checked = if engine.is_from_future(&block, now) {
                Err(ChainError::OutOfOrder(format!(
                    "block {} stamped {} ahead of {now}",
                    block.id(),
                    block.timestamp()
                )))
            } else {
                let ancestry = Ancestry::Fork {
                    store: chain.store(),
                    batch: &verified,
                };
                engine
                    .verify_structure(&block, &previous, &ancestry)
                    .and_then(|()| engine.verify_intrinsic(&block, &previous))
            };
            match checked {
                Ok(()) => {
                    previous = block.clone();
                    verified.push(block);
                }
                Err(e) if e.is_fatal() => return Err(Stop::Failed(e)),
                Err(e) if e.is_transient() => {
                    debug!(peer = %peer, error = %e, "fork block not valid yet, keeping verified prefix");
                    break;
                }
                Err(e) => {
                    return Err(self.blacklist(peer, format!("invalid block {}: {e}", block.id())));
                }
            }
        }
        if verified.is_empty() {
            return Err(deferred("first fork block is not valid yet".to_string()));
        }
        Ok(verified)
    }

    fn apply_fork(
        &self,
        chain: &mut ChainProcessor,
        peer: &PeerId,
        common: BlockId,
        fork: Vec<Block>,
    ) -> Step<ForkOutcome> {
        let better = fork.last().is_some_and(|tail| tail.better_than(chain.head()));
        if !better {
            return Err(self.blacklist(peer, "advertised a heavier chain than it delivered"));
        }

        let switched = chain
            .switch_to_fork(common, fork)
            .map_err(|e| self.chain_error(peer, e))?;
        match switched {
            ForkSwitch::Switched { popped, pushed } => {
                info!(
                    peer = %peer,
                    popped = popped.len(),
                    pushed,
                    height = chain.height(),
                    "adopted peer chain"
                );
                Ok(ForkOutcome::Switched {
                    peer: peer.clone(),
                    popped: popped.len(),
                    pushed,
                    height: chain.height(),
                })
            }
            ForkSwitch::Restored { pushed, reason } => {
                debug!(peer = %peer, pushed, "fork refused part way, previous chain restored");
                self.report(peer, &reason);
                Ok(ForkOutcome::Restored {
                    peer: peer.clone(),
                    reason,
                })
            }
        }
    }

    fn genesis_id(&self) -> BlockId {
        self.ctx.lock().genesis().id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::consensus::validator::{BlockValidator, CombinedValidator};
    use crate::net::loopback::LoopbackNetwork;
    use crate::net::NetConfig;
    use crate::storage::InMemoryBlockStore;
    use crate::test_support::{self, CREATOR};
    use crate::time::ManualClock;
    use crate::types::ProofParams;
    use crate::validation::BaseValidity;

    fn peer() -> PeerId {
        PeerId("remote".to_string())
    }

    fn context(processor: ChainProcessor, net: NetConfig) -> Arc<ChainContext> {
        let config = ChainConfig {
            net,
            ..ChainConfig::default()
        };
        Arc::new(ChainContext::new(processor, config))
    }

    fn local_with(len: usize, net: NetConfig) -> Arc<ChainContext> {
        let (mut processor, _) = test_support::processor(test_support::work_config());
        test_support::extend(&mut processor, len);
        context(processor, net)
    }

    fn resolver(local: &Arc<ChainContext>, remote: ChainProcessor) -> (ForkResolver, Arc<LoopbackNetwork>) {
        let network = Arc::new(LoopbackNetwork::new());
        network.add_peer(peer(), context(remote, NetConfig::default()), 1);
        let resolver = ForkResolver::new(local.clone(), network.clone());
        (resolver, network)
    }

    #[test]
    fn switches_to_heavier_peer_chain() {
        let local = local_with(3, NetConfig::default());
        let remote = test_support::diverged(30);
        let remote_head = remote.head().clone();
        let (resolver, network) = resolver(&local, remote);

        let d1 = local.head_summary().cumulative_difficulty;
        let outcome = resolver.sync_with(&peer()).unwrap();
        assert_eq!(
            outcome,
            ForkOutcome::Switched {
                peer: peer(),
                popped: 3,
                pushed: 30,
                height: 30,
            }
        );
        let summary = local.head_summary();
        assert_eq!(summary.id, remote_head.id());
        assert!(summary.cumulative_difficulty > d1);
        assert!(!network.is_blacklisted(&peer()));
    }

    #[test]
    fn extends_a_shared_prefix_without_popping() {
        let (mut remote, _) = test_support::processor(test_support::work_config());
        test_support::extend(&mut remote, 6);
        let (mut local_processor, _) = test_support::processor(test_support::work_config());
        for h in 1..=4 {
            local_processor
                .push_block(remote.block_at(h).unwrap().unwrap())
                .unwrap();
        }
        let local = context(local_processor, NetConfig::default());
        let (resolver, _) = resolver(&local, remote);

        match resolver.sync_with(&peer()).unwrap() {
            ForkOutcome::Switched { popped, pushed, height, .. } => {
                assert_eq!((popped, pushed, height), (0, 2, 6));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lighter_peer_is_left_alone() {
        let local = local_with(5, NetConfig::default());
        let remote = test_support::diverged(2);
        let (resolver, network) = resolver(&local, remote);
        let head = local.head_summary();

        let outcome = resolver.sync_with(&peer()).unwrap();
        assert_eq!(outcome, ForkOutcome::NotBetter { peer: peer() });
        assert_eq!(local.head_summary(), head);
        assert!(!network.is_blacklisted(&peer()));
    }

    #[test]
    fn too_many_next_block_ids_blacklists() {
        let net = NetConfig {
            max_next_block_ids: 4,
            ..NetConfig::default()
        };
        let local = local_with(2, net);
        let remote = test_support::diverged(10);
        let (resolver, network) = resolver(&local, remote);
        let head = local.head_summary();

        let outcome = resolver.sync_with(&peer()).unwrap();
        assert!(matches!(outcome, ForkOutcome::Blacklisted { .. }));
        assert!(network.is_blacklisted(&peer()));
        assert_eq!(local.head_summary(), head);
        assert_eq!(resolver.check_once().unwrap(), ForkOutcome::NoPeers);
    }

    #[test]
    fn too_many_milestone_ids_blacklists() {
        let net = NetConfig {
            max_milestone_ids: 3,
            ..NetConfig::default()
        };
        let local = local_with(2, net);
        // Heights 30, 20, 10 and genesis come back in one answer.
        let remote = test_support::diverged(30);
        let (resolver, network) = resolver(&local, remote);
        let head = local.head_summary();

        match resolver.sync_with(&peer()).unwrap() {
            ForkOutcome::Blacklisted { reason, .. } => assert!(reason.contains("milestone"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(network.is_blacklisted(&peer()));
        assert_eq!(local.head_summary(), head);
    }

    #[test]
    fn too_many_next_blocks_blacklists() {
        let net = NetConfig {
            max_next_blocks: 3,
            ..NetConfig::default()
        };
        let local = local_with(2, net);
        let remote = test_support::diverged(10);
        let (resolver, network) = resolver(&local, remote);
        let head = local.head_summary();

        match resolver.sync_with(&peer()).unwrap() {
            ForkOutcome::Blacklisted { reason, .. } => assert!(reason.contains("blocks"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(network.is_blacklisted(&peer()));
        assert_eq!(local.head_summary(), head);
    }

    #[test]
    fn fork_refused_part_way_restores_and_blacklists() {
        // The local node refuses any block paying "poison"; the peer does not.
        struct NoPoison;
        impl BlockValidator for NoPoison {
            fn validate(&self, block: &Block) -> Result<(), ChainError> {
                let poison = crate::crypto::account_id("poison");
                if block.transactions().iter().any(|tx| tx.recipient == poison) {
                    return Err(ChainError::StructuralInvalid("poisoned".to_string()));
                }
                Ok(())
            }
        }

        let cfg = test_support::work_config();
        let validator = CombinedValidator::new(BaseValidity::new(&cfg), NoPoison);
        let mut local_processor = ChainProcessor::builder(
            cfg,
            test_support::genesis_config(),
            Box::new(InMemoryBlockStore::new()),
        )
        .clock(Arc::new(ManualClock::new(test_support::GENESIS_TIMESTAMP)))
        .validator(Box::new(validator))
        .open()
        .unwrap();
        test_support::extend(&mut local_processor, 2);
        let local = context(local_processor, NetConfig::default());
        let before = local.head_summary();

        let mut remote = test_support::diverged(2);
        let poisoned = test_support::next_block(
            &remote,
            vec![test_support::payment(CREATOR, "poison", 5, 0)],
            ProofParams::Work,
        );
        remote.push_block(poisoned).unwrap();
        test_support::extend(&mut remote, 3);
        let (resolver, network) = resolver(&local, remote);

        let outcome = resolver.sync_with(&peer()).unwrap();
        assert!(matches!(outcome, ForkOutcome::Restored { .. }), "{outcome:?}");
        assert!(network.is_blacklisted(&peer()));
        assert_eq!(local.head_summary(), before);
        assert_eq!(local.lock().height(), 2);
    }
}
