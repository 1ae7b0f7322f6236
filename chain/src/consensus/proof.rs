//! Proof-engine dispatch over the configured consensus variant.
//!
//! The engine owns the consensus parameters and routes every
//! variant-specific question (next base target, proof validity, candidate
//! construction) through the [`ProofPayload`] tag.

use crate::ledger::Ledger;
use crate::types::{Block, Candidate, ConsensusVariant, ProofParams, ProofPayload, Transaction};

use super::config::ConsensusConfig;
use super::difficulty::{self, Ancestry};
use super::error::ChainError;
use super::{agreement, pos, pow};

#[derive(Clone, Debug)]
pub struct ProofEngine {
    cfg: ConsensusConfig,
}

impl ProofEngine {
    pub fn new(cfg: ConsensusConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.cfg
    }

    pub fn variant(&self) -> ConsensusVariant {
        self.cfg.variant
    }

    pub fn next_base_target(
        &self,
        previous: &Block,
        timestamp: u64,
        ancestry: &Ancestry<'_>,
    ) -> Result<u64, ChainError> {
        difficulty::next_base_target(&self.cfg, self.cfg.variant, previous, timestamp, ancestry)
    }

    /// Builds a candidate on top of `previous` with the retargeted base
    /// target.
    pub fn build_candidate(
        &self,
        previous: &Block,
        timestamp: u64,
        transactions: Vec<Transaction>,
        params: ProofParams,
        ancestry: &Ancestry<'_>,
    ) -> Result<Candidate, ChainError> {
        let matches_variant = matches!(
            (&params, self.cfg.variant),
            (ProofParams::Work, ConsensusVariant::Work)
                | (ProofParams::Stake { .. }, ConsensusVariant::Stake)
                | (ProofParams::Agreement { .. }, ConsensusVariant::Agreement)
        );
        if !matches_variant {
            return Err(ChainError::StructuralInvalid(format!(
                "{:?} parameters on a {:?} chain",
                params, self.cfg.variant
            )));
        }
        if let ProofParams::Agreement { vote, actor } = &params {
            agreement::check_fields(vote, actor)?;
        }
        let base_target = self.next_base_target(previous, timestamp, ancestry)?;
        Candidate::build(
            previous,
            timestamp,
            transactions,
            params,
            base_target,
            &self.cfg,
        )
    }

    /// Structural checks that need the chain: linkage, payload, variant,
    /// base target and cumulative difficulty.
    pub fn verify_structure(
        &self,
        block: &Block,
        previous: &Block,
        ancestry: &Ancestry<'_>,
    ) -> Result<(), ChainError> {
        if block.variant() != self.cfg.variant {
            return Err(ChainError::StructuralInvalid(format!(
                "{:?} block on a {:?} chain",
                block.variant(),
                self.cfg.variant
            )));
        }
        block.verify_structure(previous)?;

        let expected = self.next_base_target(previous, block.timestamp(), ancestry)?;
        if block.base_target() != expected {
            return Err(ChainError::StructuralInvalid(format!(
                "base target {} != expected {expected}",
                block.base_target()
            )));
        }
        if let ProofPayload::Agreement { vote, actor, .. } = block.proof() {
            agreement::check_fields(vote, actor)?;
        }
        Ok(())
    }

    /// Proof checks that need neither ledger state nor wall-clock time.
    ///
    /// This is all that can be checked for blocks on a fork that is not
    /// canonical yet.
    pub fn verify_intrinsic(&self, block: &Block, previous: &Block) -> Result<(), ChainError> {
        match block.proof() {
            ProofPayload::Work { .. } | ProofPayload::Agreement { .. } => {
                if pow::verify_work(block) {
                    Ok(())
                } else {
                    Err(ChainError::ProofInvalid(format!(
                        "hit {} not below base target {}",
                        pow::hit(block),
                        block.base_target()
                    )))
                }
            }
            ProofPayload::Stake { .. } => pos::verify_signatures(block, previous),
        }
    }

    /// Whether `block` is stamped too far ahead of `now` to accept yet.
    pub fn is_from_future(&self, block: &Block, now: u64) -> bool {
        self.cfg.variant == ConsensusVariant::Stake
            && block.timestamp() > now.saturating_add(self.cfg.max_timestamp_skew_secs)
    }

    /// Full proof check for a block extending the current head.
    pub fn verify_proof(
        &self,
        block: &Block,
        previous: &Block,
        ledger: &dyn Ledger,
        now: u64,
    ) -> Result<(), ChainError> {
        if self.is_from_future(block, now) {
            return Err(ChainError::OutOfOrder(format!(
                "timestamp {} ahead of local time {now}",
                block.timestamp()
            )));
        }
        self.verify_intrinsic(block, previous)?;
        if let ProofPayload::Stake {
            generator_public_key,
            ..
        } = block.proof()
        {
            let stake = ledger.effective_stake(&generator_public_key.account_id());
            pos::verify_eligibility(block, previous, stake)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::store::BlockStore;
    use crate::storage::InMemoryBlockStore;
    use crate::test_support;

    #[test]
    fn rejects_variant_mismatch() {
        let chain = test_support::work_chain(2);
        let engine = ProofEngine::new(test_support::stake_config());
        let store = InMemoryBlockStore::new();
        let err = engine
            .verify_structure(&chain[1], &chain[0], &Ancestry::Canonical(&store))
            .unwrap_err();
        assert!(matches!(err, ChainError::StructuralInvalid(_)));

        let err = engine
            .build_candidate(
                &chain[0],
                chain[0].timestamp() + 1,
                Vec::new(),
                ProofParams::Work,
                &Ancestry::Canonical(&store),
            )
            .unwrap_err();
        assert!(matches!(err, ChainError::StructuralInvalid(_)));
    }

    #[test]
    fn mined_work_blocks_verify() {
        let engine = ProofEngine::new(test_support::work_config());
        let chain = test_support::work_chain(4);
        let mut store = InMemoryBlockStore::new();
        store.save_block(&chain[0]).unwrap();
        for pair in chain.windows(2) {
            let ancestry = Ancestry::Canonical(&store);
            engine.verify_structure(&pair[1], &pair[0], &ancestry).unwrap();
            engine.verify_intrinsic(&pair[1], &pair[0]).unwrap();
            store.save_block(&pair[1]).unwrap();
        }
    }

    #[test]
    fn future_stake_block_is_out_of_order() {
        let engine = ProofEngine::new(test_support::stake_config());
        let genesis = test_support::stake_genesis();
        assert!(!engine.is_from_future(&genesis, genesis.timestamp()));
        assert!(engine.is_from_future(&genesis, genesis.timestamp() - 16));
        assert!(!engine.is_from_future(&genesis, genesis.timestamp() - 15));
    }
}
