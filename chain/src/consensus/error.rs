//! Error taxonomy of the consensus core.

use thiserror::Error;

use crate::storage::StorageError;
use crate::types::{BlockId, Transaction};

/// Why a transaction sank the block that carried it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxRejection {
    /// Same id or same duplicate key as an earlier transaction in the block.
    Duplicate,
    /// Rejected by the ledger's `validate`.
    Invalid,
    /// `apply_unconfirmed` refused it (insufficient unconfirmed balance).
    DoubleSpend,
}

/// Errors produced while building, verifying, accepting or rolling back
/// blocks.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Bad linkage, payload hash, totals or difficulty fields. Permanent.
    #[error("structurally invalid block: {0}")]
    StructuralInvalid(String),

    /// Bad work, stake eligibility or signature. Permanent.
    #[error("invalid block proof: {0}")]
    ProofInvalid(String),

    /// A transaction made the block unacceptable; `tx` is evicted from the
    /// pending pool by the processor.
    #[error("transaction {} rejected ({kind:?}): {reason}", .tx.id())]
    TransactionRejected {
        kind: TxRejection,
        tx: Box<Transaction>,
        reason: String,
    },

    /// The block does not connect to the current head, or its timestamp
    /// is ahead of local time. Transient.
    #[error("block out of order: {0}")]
    OutOfOrder(String),

    #[error("block {0} already known")]
    DuplicateBlock(BlockId),

    #[error("payload too large: {tx_count} txs / {payload_bytes} bytes (max {max_txs} / {max_bytes})")]
    PayloadTooLarge {
        tx_count: usize,
        payload_bytes: usize,
        max_txs: usize,
        max_bytes: usize,
    },

    #[error("invalid timestamp {timestamp}: must be greater than previous {previous}")]
    InvalidTimestamp { timestamp: u64, previous: u64 },

    /// The proof-dependent fields of a candidate are not final yet.
    #[error("block id is not final until the block is signed")]
    NotYetFinalized,

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The chain can no longer be trusted to be consistent.
    #[error("fatal chain error: {0}")]
    Fatal(String),
}

impl ChainError {
    /// Only ordering races are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::OutOfOrder(_))
    }

    /// Whether the node cannot safely continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::Fatal(_) | ChainError::Storage(_))
    }

    /// Transaction to evict from the pending pool, if this error names one.
    pub fn offending_transaction(&self) -> Option<&Transaction> {
        match self {
            ChainError::TransactionRejected { tx, .. } => Some(tx.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn rejected(kind: TxRejection, tx: &Transaction, reason: impl Into<String>) -> Self {
        ChainError::TransactionRejected {
            kind,
            tx: Box::new(tx.clone()),
            reason: reason.into(),
        }
    }
}

/// Errors decoding blocks from their wire or JSON encodings.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("wire encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("wire decoding failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} trailing bytes after block")]
    TrailingBytes(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_out_of_order_is_transient() {
        assert!(ChainError::OutOfOrder("late".into()).is_transient());
        assert!(!ChainError::ProofInvalid("bad".into()).is_transient());
        assert!(!ChainError::DuplicateBlock(BlockId(1)).is_transient());
        assert!(ChainError::Fatal("x".into()).is_fatal());
    }
}
