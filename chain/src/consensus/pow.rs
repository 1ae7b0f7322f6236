//! Proof of work.
//!
//! A block's work is valid iff the low 8 bytes of `sha256(block.bytes())`,
//! read as a little-endian integer, are below its base target. A failed
//! check is the ordinary "keep searching" signal while mining.

use crate::types::{Block, Candidate};

/// Hit of a block: low 8 bytes of its hash.
pub fn hit(block: &Block) -> u64 {
    block.hash().low_u64()
}

pub fn verify_work(block: &Block) -> bool {
    hit(block) < block.base_target()
}

/// Same predicate on an unfrozen candidate.
pub fn candidate_meets_target(candidate: &Candidate) -> bool {
    candidate.hash().low_u64() < candidate.base_target()
}

/// Tries up to `attempts` nonces. Leaves the candidate on the winning
/// nonce and returns `true`, or returns `false` after exhausting them.
pub fn search(candidate: &mut Candidate, attempts: u64) -> bool {
    for _ in 0..attempts {
        if candidate_meets_target(candidate) {
            return true;
        }
        candidate.inc_nonce();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::config::ConsensusConfig;
    use crate::test_support;
    use crate::types::ProofParams;

    #[test]
    fn verify_work_matches_hash_formula() {
        for block in test_support::work_chain(6).iter().skip(1) {
            let expected = block.hash().low_u64() < block.base_target();
            assert_eq!(verify_work(block), expected);
            assert!(verify_work(block));
        }
    }

    #[test]
    fn search_finds_a_valid_nonce() {
        let genesis = test_support::work_chain(1).remove(0);
        let mut candidate = Candidate::build(
            &genesis,
            genesis.timestamp() + 1,
            Vec::new(),
            ProofParams::Work,
            u64::MAX / 8,
            &ConsensusConfig::default(),
        )
        .unwrap();
        assert!(search(&mut candidate, 10_000));
        let block = candidate.freeze().unwrap();
        assert!(verify_work(&block));
    }

    #[test]
    fn impossible_target_is_never_met() {
        let genesis = test_support::work_chain(1).remove(0);
        let mut candidate = Candidate::build(
            &genesis,
            genesis.timestamp() + 1,
            Vec::new(),
            ProofParams::Work,
            1,
            &ConsensusConfig::default(),
        )
        .unwrap();
        // Only a hit of exactly zero would pass.
        assert!(!search(&mut candidate, 64));
        assert_eq!(candidate.nonce(), Some(64));
    }
}
