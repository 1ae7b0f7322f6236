//! Shared chain handle.
//!
//! [`ChainContext`] bundles the chain processor (behind the chain-wide
//! lock), the pending pool, the configuration and the clock. The forger,
//! the fork resolver and the node's HTTP handlers each hold an
//! `Arc<ChainContext>`.
//!
//! Lock order is chain first, then pool. The pool lock is never held while
//! waiting for the chain lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::config::ChainConfig;
use crate::pool::PendingPool;
use crate::time::Clock;
use crate::types::{Block, BlockId, Transaction};

use super::error::{ChainError, TxRejection};
use super::processor::ChainProcessor;

/// Snapshot of the head for status reporting.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadSummary {
    pub height: u64,
    pub id: BlockId,
    #[serde(with = "crate::types::u128_string")]
    pub cumulative_difficulty: u128,
    pub base_target: u64,
    pub timestamp: u64,
}

impl From<&Block> for HeadSummary {
    fn from(block: &Block) -> Self {
        Self {
            height: block.height(),
            id: block.id(),
            cumulative_difficulty: block.cumulative_difficulty(),
            base_target: block.base_target(),
            timestamp: block.timestamp(),
        }
    }
}

pub struct ChainContext {
    chain: Mutex<ChainProcessor>,
    pool: Arc<Mutex<PendingPool>>,
    config: ChainConfig,
    clock: Arc<dyn Clock>,
}

impl ChainContext {
    /// Wraps an opened processor. The pool and clock are the processor's
    /// own, so the context and the processor always agree on them.
    pub fn new(processor: ChainProcessor, config: ChainConfig) -> Self {
        let pool = processor.pool().clone();
        let clock = processor.clock().clone();
        Self {
            chain: Mutex::new(processor),
            pool,
            config,
            clock,
        }
    }

    /// Takes the chain-wide lock.
    pub fn lock(&self) -> MutexGuard<'_, ChainProcessor> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the chain-wide lock.
    pub fn with_chain<R>(&self, f: impl FnOnce(&mut ChainProcessor) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn pool(&self) -> MutexGuard<'_, PendingPool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn push_block(&self, block: Block) -> Result<(), ChainError> {
        self.lock().push_block(block)
    }

    pub fn head_summary(&self) -> HeadSummary {
        HeadSummary::from(self.lock().head())
    }

    /// Validates `tx` against the ledger and adds it to the pending pool.
    ///
    /// Returns `false` if it was already pending.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<bool, ChainError> {
        let chain = self.lock();
        chain
            .ledger()
            .validate(&tx)
            .map_err(|reason| ChainError::rejected(TxRejection::Invalid, &tx, reason))?;
        let added = self.pool().add(tx);
        drop(chain);
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn context() -> ChainContext {
        let (processor, _) = test_support::processor(test_support::work_config());
        ChainContext::new(processor, ChainConfig::default())
    }

    #[test]
    fn submitted_transactions_land_in_the_shared_pool() {
        let ctx = context();
        let tx = test_support::payment("alice", "bob", 10, 1);
        assert!(ctx.submit_transaction(tx.clone()).unwrap());
        assert!(!ctx.submit_transaction(tx.clone()).unwrap());
        assert!(ctx.lock().pool().lock().unwrap().contains(tx.id()));
    }

    #[test]
    fn unfunded_transactions_are_refused() {
        let ctx = context();
        let tx = test_support::payment("nobody", "bob", 10, 1);
        let err = ctx.submit_transaction(tx).unwrap_err();
        assert!(err.offending_transaction().is_some());
        assert!(ctx.pool().is_empty());
    }

    #[test]
    fn head_summary_tracks_pushes() {
        let ctx = context();
        assert_eq!(ctx.head_summary().height, 0);
        ctx.with_chain(|p| test_support::extend(p, 2));
        let summary = ctx.head_summary();
        assert_eq!(summary.height, 2);
        assert_eq!(summary.id, ctx.lock().head().id());
    }
}
