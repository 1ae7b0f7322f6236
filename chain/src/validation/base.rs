//! Base validity predicate for blocks.
//!
//! This validator enforces cheap, deterministic invariants that do not
//! need ledger state:
//!
//! - transaction count and payload byte limits,
//! - no two transactions with the same id or the same duplicate key
//!   (e.g. two assignments of one alias) within a single block.

use std::collections::HashSet;

use crate::consensus::config::ConsensusConfig;
use crate::consensus::error::{ChainError, TxRejection};
use crate::consensus::validator::BlockValidator;
use crate::types::Block;

/// Base validity predicate for blocks, configured from
/// [`ConsensusConfig`].
#[derive(Clone, Debug)]
pub struct BaseValidity {
    max_block_txs: usize,
    max_payload_bytes: usize,
}

impl BaseValidity {
    pub fn new(cfg: &ConsensusConfig) -> Self {
        Self {
            max_block_txs: cfg.max_block_txs,
            max_payload_bytes: cfg.max_payload_bytes,
        }
    }

    fn check_limits(&self, block: &Block) -> Result<(), ChainError> {
        let tx_count = block.transactions().len();
        let payload_bytes = block.header().payload_length as usize;
        if tx_count > self.max_block_txs || payload_bytes > self.max_payload_bytes {
            return Err(ChainError::PayloadTooLarge {
                tx_count,
                payload_bytes,
                max_txs: self.max_block_txs,
                max_bytes: self.max_payload_bytes,
            });
        }
        Ok(())
    }

    fn check_duplicates(&self, block: &Block) -> Result<(), ChainError> {
        let mut ids = HashSet::new();
        let mut keys = HashSet::new();

        for tx in block.transactions() {
            if !ids.insert(tx.id()) {
                return Err(ChainError::rejected(
                    TxRejection::Duplicate,
                    tx,
                    "transaction appears twice in block",
                ));
            }
            if let Some(key) = tx.duplicate_key() {
                if !keys.insert(key.clone()) {
                    return Err(ChainError::rejected(
                        TxRejection::Duplicate,
                        tx,
                        format!("duplicate key {key} within block"),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl BlockValidator for BaseValidity {
    fn validate(&self, block: &Block) -> Result<(), ChainError> {
        self.check_limits(block)?;
        self.check_duplicates(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::test_support;
    use crate::types::Transaction;

    fn block_with(txs: Vec<Transaction>) -> Block {
        test_support::work_block_with(txs)
    }

    #[test]
    fn accepts_small_block() {
        let v = BaseValidity::new(&test_support::work_config());
        let block = block_with(vec![test_support::payment(test_support::CREATOR, "a", 5, 0)]);
        assert!(v.validate(&block).is_ok());
    }

    #[test]
    fn rejects_too_many_txs() {
        let cfg = ConsensusConfig {
            max_block_txs: 1,
            ..test_support::work_config()
        };
        let v = BaseValidity::new(&cfg);
        let block = block_with(vec![
            test_support::payment(test_support::CREATOR, "a", 5, 0),
            test_support::payment(test_support::CREATOR, "b", 5, 0),
        ]);
        assert!(matches!(
            v.validate(&block),
            Err(ChainError::PayloadTooLarge { tx_count: 2, .. })
        ));
    }

    #[test]
    fn rejects_oversized_payload() {
        let cfg = ConsensusConfig {
            max_payload_bytes: 1,
            ..test_support::work_config()
        };
        let v = BaseValidity::new(&cfg);
        let block = block_with(vec![test_support::payment(test_support::CREATOR, "a", 5, 0)]);
        assert!(matches!(v.validate(&block), Err(ChainError::PayloadTooLarge { .. })));
    }

    #[test]
    fn rejects_duplicate_alias_and_names_the_transaction() {
        let v = BaseValidity::new(&test_support::work_config());
        let key = crypto::signing_key("alice");
        let pk = crypto::public_key(&key);
        let first = Transaction::alias_assignment(pk.clone(), "Alice", 0, 1).signed(&key);
        let second = Transaction::alias_assignment(pk, "alice", 0, 2).signed(&key);
        let block = block_with(vec![first, second.clone()]);

        let err = v.validate(&block).unwrap_err();
        assert_eq!(err.offending_transaction().map(Transaction::id), Some(second.id()));
    }
}
