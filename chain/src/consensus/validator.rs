//! Block validity predicates used by the chain processor.

use crate::types::Block;

use super::error::ChainError;

/// Pluggable block-local validity predicate.
///
/// Implementations should be deterministic and side-effect free. They run
/// after structure and proof checks and before the ledger sees the
/// block's transactions.
pub trait BlockValidator: Send {
    fn validate(&self, block: &Block) -> Result<(), ChainError>;
}

/// Runs two validators in order, failing fast on the first error.
pub struct CombinedValidator<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> CombinedValidator<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> BlockValidator for CombinedValidator<A, B>
where
    A: BlockValidator,
    B: BlockValidator,
{
    fn validate(&self, block: &Block) -> Result<(), ChainError> {
        self.first.validate(block)?;
        self.second.validate(block)
    }
}
