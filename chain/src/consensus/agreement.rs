//! Byzantine-agreement overlay.
//!
//! Agreement blocks are proof-of-work blocks that also carry an opaque
//! `vote` and an `actor` discriminator, both hashed into the block bytes.
//! Which vote "wins" is a read-only query over the recent chain, never a
//! validity rule.

use std::collections::HashMap;

use serde::Serialize;

use crate::storage::StorageError;
use crate::types::ProofPayload;

use super::error::ChainError;
use super::store::BlockStore;

/// Vote and actor used by the genesis block of an agreement chain.
pub const GENESIS_VOTE: &str = "_GENESIS_";

/// Upper bound on the vote and actor byte lengths.
pub const MAX_FIELD_BYTES: usize = 1024;

/// Structural bounds on the vote fields.
pub fn check_fields(vote: &str, actor: &str) -> Result<(), ChainError> {
    if vote.is_empty() || actor.is_empty() {
        return Err(ChainError::StructuralInvalid(
            "agreement vote and actor must be non-empty".to_string(),
        ));
    }
    if vote.len() > MAX_FIELD_BYTES || actor.len() > MAX_FIELD_BYTES {
        return Err(ChainError::StructuralInvalid(format!(
            "agreement fields exceed {MAX_FIELD_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Result of tallying votes over the recent half of the chain.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct VoteTally {
    /// Lowest height counted.
    pub from_height: u64,
    /// Head height at tally time.
    pub to_height: u64,
    /// Votes by count, descending, ties broken by vote ascending.
    pub counts: Vec<(String, u64)>,
}

impl VoteTally {
    /// Plurality winner.
    pub fn winner(&self) -> Option<&str> {
        self.counts.first().map(|(vote, _)| vote.as_str())
    }
}

/// Tallies votes over heights `h` with `2h > head_height`, genesis
/// excluded.
pub fn tally_votes(store: &dyn BlockStore, head_height: u64) -> Result<VoteTally, StorageError> {
    let from_height = (head_height / 2 + 1).max(1);
    let mut counts: HashMap<String, u64> = HashMap::new();

    for height in from_height..=head_height {
        let Some(block) = store.find_block_at_height(height)? else {
            return Err(StorageError::Corrupted(format!(
                "no block at canonical height {height}"
            )));
        };
        if let ProofPayload::Agreement { vote, .. } = block.proof() {
            *counts.entry(vote.clone()).or_default() += 1;
        }
    }

    let mut counts: Vec<(String, u64)> = counts.into_iter().collect();
    counts.sort_by(|(va, ca), (vb, cb)| cb.cmp(ca).then_with(|| va.cmp(vb)));

    Ok(VoteTally {
        from_height,
        to_height: head_height,
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBlockStore;
    use crate::test_support;

    #[test]
    fn tally_counts_only_recent_half_and_orders_plurality() {
        // Heights 1..=3 vote "old", 4..=7 vote per the list below.
        let votes = ["old", "old", "old", "b", "a", "b", "a"];
        let chain = test_support::agreement_chain(&votes);
        let mut store = InMemoryBlockStore::new();
        for b in &chain {
            store.save_block(b).unwrap();
        }

        let tally = tally_votes(&store, 7).unwrap();
        assert_eq!(tally.from_height, 4);
        assert_eq!(
            tally.counts,
            vec![("a".to_string(), 2), ("b".to_string(), 2)]
        );
        assert_eq!(tally.winner(), Some("a"));
    }

    #[test]
    fn tally_on_genesis_only_chain_is_empty() {
        let chain = test_support::agreement_chain(&[]);
        let mut store = InMemoryBlockStore::new();
        store.save_block(&chain[0]).unwrap();
        let tally = tally_votes(&store, 0).unwrap();
        assert!(tally.counts.is_empty());
        assert_eq!(tally.winner(), None);
    }

    #[test]
    fn field_bounds() {
        assert!(check_fields("yes", "node-1").is_ok());
        assert!(check_fields("", "node-1").is_err());
        assert!(check_fields("yes", &"x".repeat(MAX_FIELD_BYTES + 1)).is_err());
    }
}
