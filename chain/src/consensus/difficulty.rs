//! Base-target retargeting and cumulative difficulty.
//!
//! All variants accumulate difficulty the same way:
//! `cumulative = previous + 2^64 / base_target`. They differ in how the
//! base target moves:
//!
//! - work and agreement chains keep it fixed inside a calibration interval
//!   of `I` blocks and rescale it at interval boundaries by the ratio of
//!   actual to wanted elapsed time,
//! - stake chains rescale it every block by `elapsed / stake_block_secs`,
//!   bounded to a factor of two either way.

use super::config::ConsensusConfig;
use super::error::ChainError;
use super::store::BlockStore;
use crate::types::{Block, ConsensusVariant};

const TWO_POW_64: u128 = 1 << 64;

/// Difficulty contributed by one block with the given base target.
pub fn difficulty_of(base_target: u64) -> u128 {
    TWO_POW_64 / u128::from(base_target.max(1))
}

/// `previous + 2^64 / base_target`.
pub fn next_cumulative_difficulty(previous: u128, base_target: u64) -> u128 {
    previous.saturating_add(difficulty_of(base_target))
}

/// How to find ancestors of the block being extended.
///
/// Canonical lookups go straight to the store by height. Fork lookups walk
/// `previous_block_id` links backwards through a batch of not yet
/// canonical blocks, falling back to the store once the walk leaves the
/// batch.
#[derive(Clone, Copy)]
pub enum Ancestry<'a> {
    Canonical(&'a dyn BlockStore),
    Fork {
        store: &'a dyn BlockStore,
        batch: &'a [Block],
    },
}

impl Ancestry<'_> {
    /// Returns the ancestor of `from` at `height`.
    pub fn ancestor_at(&self, from: &Block, height: u64) -> Result<Block, ChainError> {
        if height == from.height() {
            return Ok(from.clone());
        }
        if height > from.height() {
            return Err(ChainError::StructuralInvalid(format!(
                "ancestor height {height} above block height {}",
                from.height()
            )));
        }
        let missing = |h: u64| ChainError::StructuralInvalid(format!("missing ancestor at height {h}"));

        match *self {
            Ancestry::Canonical(store) => store.find_block_at_height(height)?.ok_or(missing(height)),
            Ancestry::Fork { store, batch } => {
                let mut current = from.clone();
                while current.height() > height {
                    let prev_id = current.previous_block_id();
                    current = match batch.iter().find(|b| b.id() == prev_id) {
                        Some(b) => b.clone(),
                        None => store.find_block(prev_id)?.ok_or(missing(current.height() - 1))?,
                    };
                }
                Ok(current)
            }
        }
    }
}

/// Calibration-interval retarget for work and agreement chains.
///
/// Computed in 128-bit arithmetic and clamped to `[1, max_base_target]`.
pub fn retarget_work(
    previous_base_target: u64,
    elapsed_secs: u64,
    interval: u64,
    wanted_block_secs: u64,
    max_base_target: u64,
) -> u64 {
    let wanted = u128::from(interval.max(1)) * u128::from(wanted_block_secs.max(1));
    let scaled = u128::from(previous_base_target) * u128::from(elapsed_secs) / wanted;
    let clamped = scaled.clamp(1, u128::from(max_base_target.max(1)));
    clamped as u64
}

/// Per-block retarget for stake chains.
///
/// Bounded to `[previous / 2, previous * 2]`, then to the ceiling, then
/// floored at 1.
pub fn retarget_stake(
    previous_base_target: u64,
    elapsed_secs: u64,
    stake_block_secs: u64,
    max_base_target: u64,
) -> u64 {
    let previous = u128::from(previous_base_target);
    let scaled = previous * u128::from(elapsed_secs) / u128::from(stake_block_secs.max(1));
    let bounded = scaled
        .max(previous / 2)
        .min(previous.saturating_mul(2))
        .min(u128::from(max_base_target))
        .max(1);
    bounded as u64
}

/// Base target the block after `previous` must carry.
///
/// `timestamp` is the new block's timestamp; only stake chains use it.
pub fn next_base_target(
    cfg: &ConsensusConfig,
    variant: ConsensusVariant,
    previous: &Block,
    timestamp: u64,
    ancestry: &Ancestry<'_>,
) -> Result<u64, ChainError> {
    match variant {
        ConsensusVariant::Work | ConsensusVariant::Agreement => {
            let height = previous.height() + 1;
            let interval = cfg.calibration_interval.max(1);
            if height % interval != 0 || height <= interval {
                return Ok(previous.base_target());
            }
            let anchor = ancestry.ancestor_at(previous, height - 1 - interval)?;
            let elapsed = previous.timestamp().saturating_sub(anchor.timestamp());
            Ok(retarget_work(
                previous.base_target(),
                elapsed,
                interval,
                cfg.wanted_block_secs,
                cfg.max_base_target,
            ))
        }
        ConsensusVariant::Stake => {
            let elapsed = timestamp.saturating_sub(previous.timestamp());
            Ok(retarget_stake(
                previous.base_target(),
                elapsed,
                cfg.stake_block_secs,
                cfg.max_base_target,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBlockStore;
    use crate::test_support;

    const BT: u64 = 1_000_000_000;

    #[test]
    fn on_target_interval_leaves_base_target_unchanged() {
        assert_eq!(retarget_work(BT, 201 * 60, 201, 60, u64::MAX), BT);
    }

    #[test]
    fn double_time_doubles_base_target_subject_to_clamp() {
        assert_eq!(retarget_work(BT, 2 * 201 * 60, 201, 60, u64::MAX), 2 * BT);
        assert_eq!(retarget_work(BT, 2 * 201 * 60, 201, 60, BT + 5), BT + 5);
    }

    #[test]
    fn work_retarget_never_reaches_zero() {
        assert_eq!(retarget_work(BT, 0, 201, 60, u64::MAX), 1);
        assert_eq!(retarget_work(u64::MAX, u64::MAX, 1, 1, u64::MAX), u64::MAX);
    }

    #[test]
    fn stake_retarget_is_bounded_by_factor_two() {
        assert_eq!(retarget_stake(BT, 60, 60, u64::MAX), BT);
        assert_eq!(retarget_stake(BT, 600, 60, u64::MAX), 2 * BT);
        assert_eq!(retarget_stake(BT, 1, 60, u64::MAX), BT / 2);
        assert_eq!(retarget_stake(BT, 90, 60, u64::MAX), BT + BT / 2);
        assert_eq!(retarget_stake(BT, 600, 60, BT), BT);
        assert_eq!(retarget_stake(1, 0, 60, u64::MAX), 1);
    }

    #[test]
    fn retarget_is_reproducible() {
        let elapsed = [30u64, 90, 60, 3, 240, 61];
        let run = || {
            elapsed
                .iter()
                .fold(BT, |bt, e| retarget_stake(bt, *e, 60, 4 * BT))
        };
        let first = run();
        assert_eq!(first, run());
        assert!(first >= 1 && first <= 4 * BT);
    }

    #[test]
    fn difficulty_accumulates() {
        assert_eq!(difficulty_of(1 << 32), 1 << 32);
        assert_eq!(next_cumulative_difficulty(7, 1 << 63), 9);
        assert_eq!(difficulty_of(0), TWO_POW_64);
    }

    #[test]
    fn work_chain_retargets_only_at_interval_boundaries() {
        let cfg = ConsensusConfig {
            calibration_interval: 4,
            wanted_block_secs: 10,
            ..test_support::work_config()
        };
        // Blocks spaced 20s apart: twice the wanted time.
        let chain = test_support::work_chain_spaced(&cfg, 8, 20);
        let mut store = InMemoryBlockStore::new();
        for b in &chain {
            store.save_block(b).unwrap();
        }
        let ancestry = Ancestry::Canonical(&store);

        let bt0 = chain[0].base_target();
        // Heights 1..=4 keep the genesis target (h == I is not a boundary).
        for b in &chain[1..=4] {
            assert_eq!(b.base_target(), bt0);
        }
        // Height 8 rescales by elapsed(7 - 3 = 4 blocks * 20s) / (4 * 10s).
        let next = next_base_target(&cfg, ConsensusVariant::Work, &chain[7], 0, &ancestry).unwrap();
        assert_eq!(next, (bt0 * 2).min(cfg.max_base_target));

        let fork_ancestry = Ancestry::Fork {
            store: &store,
            batch: &chain[5..],
        };
        let via_fork =
            next_base_target(&cfg, ConsensusVariant::Work, &chain[7], 0, &fork_ancestry).unwrap();
        assert_eq!(via_fork, next);
    }

    #[test]
    fn fork_ancestry_walks_previous_links() {
        let chain = test_support::work_chain(5);
        let mut store = InMemoryBlockStore::new();
        for b in &chain[..2] {
            store.save_block(b).unwrap();
        }
        let ancestry = Ancestry::Fork {
            store: &store,
            batch: &chain[2..],
        };
        let found = ancestry.ancestor_at(&chain[4], 1).unwrap();
        assert_eq!(found.id(), chain[1].id());
        assert!(ancestry.ancestor_at(&chain[1], 3).is_err());
    }
}
