//! Proof of stake.
//!
//! Each block carries a generation signature chained from its parent's:
//! `gs = sha256(previous.gs || generator_public_key)`. Its low 8 bytes are
//! the generator's *hit*. A generator holding `stake` may publish at time
//! `t` iff `hit < previous.base_target * stake * (t - previous.timestamp)`,
//! so the earliest permitted time is
//! `previous.timestamp + hit / (base_target * stake) + 1`.

use std::cmp::Ordering;

use crate::crypto;
use crate::types::{AccountId, Block, Hash256, ProofPayload, PublicKey};

use super::error::ChainError;

pub fn generation_signature(previous: &Hash256, generator: &PublicKey) -> Hash256 {
    Hash256::compute_parts([&previous.as_bytes()[..], generator.as_bytes()])
}

pub fn hit(generation_signature: &Hash256) -> u64 {
    generation_signature.low_u64()
}

/// Eligibility predicate, in 128-bit arithmetic.
///
/// A target that overflows 128 bits exceeds every possible hit.
pub fn is_eligible(hit: u64, previous_base_target: u64, stake: u64, elapsed_secs: u64) -> bool {
    if elapsed_secs == 0 || stake == 0 {
        return false;
    }
    let target = u128::from(previous_base_target)
        .checked_mul(u128::from(stake))
        .and_then(|t| t.checked_mul(u128::from(elapsed_secs)));
    match target {
        Some(t) => u128::from(hit) < t,
        None => true,
    }
}

/// Earliest timestamp at which a generator with `hit` and `stake` may
/// publish on top of `previous`. `None` without stake.
pub fn hit_time(previous: &Block, hit: u64, stake: u64) -> Option<u64> {
    if stake == 0 {
        return None;
    }
    let per_second = u128::from(previous.base_target().max(1)) * u128::from(stake);
    let wait = u128::from(hit) / per_second;
    let wait = u64::try_from(wait).ok()?;
    previous.timestamp().checked_add(wait)?.checked_add(1)
}

/// A local generator's standing for the next block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneratorRank {
    pub account: AccountId,
    pub hit: u64,
    pub stake: u64,
}

impl GeneratorRank {
    /// Orders generators by `hit / stake`, then lower hit, then account.
    ///
    /// The ratio comparison is done by cross-multiplying so no precision
    /// is lost.
    pub fn compare(&self, other: &Self) -> Ordering {
        let lhs = u128::from(self.hit) * u128::from(other.stake);
        let rhs = u128::from(other.hit) * u128::from(self.stake);
        lhs.cmp(&rhs)
            .then(self.hit.cmp(&other.hit))
            .then(self.account.cmp(&other.account))
    }
}

/// Checks the parts of a stake proof that do not depend on ledger state:
/// the generation signature chain and the block signature.
pub fn verify_signatures(block: &Block, previous: &Block) -> Result<(), ChainError> {
    let ProofPayload::Stake {
        generator_public_key,
        generation_signature: gs,
        block_signature,
    } = block.proof()
    else {
        return Err(ChainError::StructuralInvalid(
            "expected a stake block".to_string(),
        ));
    };
    let previous_gs = previous.generation_signature().ok_or_else(|| {
        ChainError::StructuralInvalid("previous block carries no generation signature".to_string())
    })?;

    if *gs != generation_signature(previous_gs, generator_public_key) {
        return Err(ChainError::ProofInvalid(
            "generation signature does not chain from previous block".to_string(),
        ));
    }
    let signature = block_signature.as_ref().ok_or(ChainError::NotYetFinalized)?;
    if !crypto::verify(generator_public_key, &block.unsigned_bytes(), signature) {
        return Err(ChainError::ProofInvalid("bad block signature".to_string()));
    }
    Ok(())
}

/// Checks that the generator was entitled to publish this block given its
/// effective stake.
pub fn verify_eligibility(block: &Block, previous: &Block, stake: u64) -> Result<(), ChainError> {
    let Some(gs) = block.generation_signature() else {
        return Err(ChainError::StructuralInvalid(
            "expected a stake block".to_string(),
        ));
    };
    let elapsed = block.timestamp().saturating_sub(previous.timestamp());
    if !is_eligible(hit(gs), previous.base_target(), stake, elapsed) {
        return Err(ChainError::ProofInvalid(format!(
            "generator not eligible: hit {} with stake {stake} after {elapsed}s",
            hit(gs)
        )));
    }
    Ok(())
}
