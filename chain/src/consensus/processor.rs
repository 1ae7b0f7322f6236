//! Chain processor: block acceptance, pop-off, rescan and fork switching.
//!
//! The processor wires together:
//!
//! - a [`BlockStore`] for persistence,
//! - a [`ProofEngine`] for structure and proof checks,
//! - a [`BlockValidator`] for block-local limits,
//! - a [`Ledger`] plus any number of [`DerivedTable`]s for derived state,
//! - the shared [`PendingPool`].
//!
//! Every mutating method assumes the caller holds the chain-wide lock
//! (see [`ChainContext`](super::context::ChainContext)). Store writes made
//! by `push_block` and `pop_off_to` are wrapped in one transaction scope;
//! on failure the store, the derived tables and the chain index are all
//! put back to where they were before the call.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::ledger::{BalanceLedger, DerivedTable, Ledger};
use crate::metrics::ConsensusMetrics;
use crate::pool::PendingPool;
use crate::time::{Clock, SystemClock};
use crate::types::{Block, BlockId, Transaction};
use crate::validation::BaseValidity;

use super::agreement::{self, VoteTally};
use super::chain::Chain;
use super::config::{ConsensusConfig, GenesisConfig};
use super::difficulty::Ancestry;
use super::error::{ChainError, TxRejection};
use super::events::{ChainEvent, Listeners};
use super::genesis;
use super::proof::ProofEngine;
use super::store::BlockStore;
use super::validator::BlockValidator;

const SCAN_LOG_EVERY: u64 = 5000;

/// Result of [`ChainProcessor::switch_to_fork`].
#[derive(Debug)]
pub enum ForkSwitch {
    /// The fork is canonical now. `popped` holds the replaced local
    /// blocks, highest first.
    Switched { popped: Vec<Block>, pushed: usize },
    /// A fork block was refused and the previous chain was restored.
    Restored { pushed: usize, reason: String },
}

/// Assembles a [`ChainProcessor`].
pub struct ChainProcessorBuilder {
    consensus: ConsensusConfig,
    genesis: GenesisConfig,
    store: Box<dyn BlockStore>,
    ledger: Option<Box<dyn Ledger>>,
    tables: Vec<Box<dyn DerivedTable>>,
    listeners: Listeners,
    pool: Arc<Mutex<PendingPool>>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<ConsensusMetrics>>,
    validator: Option<Box<dyn BlockValidator>>,
}

impl ChainProcessorBuilder {
    /// Ledger driving transaction semantics. Defaults to a
    /// [`BalanceLedger`] owned by the genesis creator.
    pub fn ledger(mut self, ledger: Box<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Extra derived state rolled back and trimmed along with the ledger.
    pub fn table(mut self, table: Box<dyn DerivedTable>) -> Self {
        self.tables.push(table);
        self
    }

    pub fn listener(
        mut self,
        event: ChainEvent,
        listener: impl Fn(&Block) + Send + Sync + 'static,
    ) -> Self {
        self.listeners.add(event, Box::new(listener));
        self
    }

    pub fn pool(mut self, pool: Arc<Mutex<PendingPool>>) -> Self {
        self.pool = pool;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: Arc<ConsensusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Block-local validator. Defaults to [`BaseValidity`].
    pub fn validator(mut self, validator: Box<dyn BlockValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Loads the chain from the store, or starts it from genesis.
    ///
    /// A store that already holds a height-0 block must hold this
    /// network's genesis; its chain is then replayed to rebuild derived
    /// state.
    pub fn open(self) -> Result<ChainProcessor, ChainError> {
        let genesis = genesis::genesis_block(&self.consensus, &self.genesis)?;
        let ledger = self.ledger.unwrap_or_else(|| {
            Box::new(BalanceLedger::new(genesis::creator_account(&self.genesis)))
        });
        let validator = self
            .validator
            .unwrap_or_else(|| Box::new(BaseValidity::new(&self.consensus)));
        let validate_on_start = self.consensus.validate_on_start;

        let mut processor = ChainProcessor {
            engine: ProofEngine::new(self.consensus),
            genesis,
            store: self.store,
            ledger,
            tables: self.tables,
            listeners: self.listeners,
            chain: Chain::new(),
            pool: self.pool,
            clock: self.clock,
            metrics: self.metrics,
            validator,
            last_trim_height: 0,
        };

        match processor.store.find_block_at_height(0)? {
            Some(stored) if stored.id() != processor.genesis.id() => {
                return Err(ChainError::Fatal(format!(
                    "stored genesis {} does not match configured genesis {}",
                    stored.id(),
                    processor.genesis.id()
                )));
            }
            Some(_) => {
                info!("loading chain from storage");
                processor.scan(0, validate_on_start)?;
            }
            None => processor.add_genesis()?,
        }
        info!(
            height = processor.height(),
            genesis = %processor.genesis.id(),
            "chain opened"
        );
        Ok(processor)
    }
}

/// Accepts, pops and replays blocks on the canonical chain.
pub struct ChainProcessor {
    engine: ProofEngine,
    genesis: Block,
    store: Box<dyn BlockStore>,
    ledger: Box<dyn Ledger>,
    tables: Vec<Box<dyn DerivedTable>>,
    listeners: Listeners,
    chain: Chain,
    pool: Arc<Mutex<PendingPool>>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<ConsensusMetrics>>,
    validator: Box<dyn BlockValidator>,
    last_trim_height: u64,
}

impl ChainProcessor {
    pub fn builder(
        consensus: ConsensusConfig,
        genesis: GenesisConfig,
        store: Box<dyn BlockStore>,
    ) -> ChainProcessorBuilder {
        ChainProcessorBuilder {
            consensus,
            genesis,
            store,
            ledger: None,
            tables: Vec::new(),
            listeners: Listeners::default(),
            pool: Arc::new(Mutex::new(PendingPool::new())),
            clock: Arc::new(SystemClock),
            metrics: None,
            validator: None,
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        self.engine.config()
    }

    pub fn engine(&self) -> &ProofEngine {
        &self.engine
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    /// Current head. Before the chain is loaded this is genesis.
    pub fn head(&self) -> &Block {
        self.chain.head().unwrap_or(&self.genesis)
    }

    pub fn height(&self) -> u64 {
        self.head().height()
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn store(&self) -> &dyn BlockStore {
        self.store.as_ref()
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    pub fn pool(&self) -> &Arc<Mutex<PendingPool>> {
        &self.pool
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Ancestor lookups along the canonical chain.
    pub fn ancestry(&self) -> Ancestry<'_> {
        Ancestry::Canonical(self.store.as_ref())
    }

    pub fn block(&self, id: BlockId) -> Result<Option<Block>, ChainError> {
        Ok(self.store.find_block(id)?)
    }

    pub fn block_at(&self, height: u64) -> Result<Option<Block>, ChainError> {
        Ok(self.store.find_block_at_height(height)?)
    }

    /// Lowest height `pop_off_to` can reach without a full rescan.
    pub fn min_rollback_height(&self) -> u64 {
        let cfg = self.config();
        if !cfg.trim_derived_tables {
            return 0;
        }
        if self.last_trim_height > 0 {
            self.last_trim_height
        } else {
            self.height().saturating_sub(cfg.max_rollback)
        }
    }

    /// Vote tally over the most recent half of the chain.
    pub fn tally_votes(&self) -> Result<VoteTally, ChainError> {
        Ok(agreement::tally_votes(self.store.as_ref(), self.height())?)
    }

    fn lock_pool(&self) -> MutexGuard<'_, PendingPool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn requeue(&self, popped: &[Block]) {
        let txs: Vec<Transaction> = popped
            .iter()
            .flat_map(|b| b.transactions().iter().cloned())
            .collect();
        if txs.is_empty() {
            return;
        }
        let requeued = self.lock_pool().requeue(txs);
        debug!(requeued, "returned popped transactions to the pool");
    }

    /// Accepts `block` as the new head.
    ///
    /// On failure nothing observable has changed, except that a
    /// transaction named by the error is evicted from the pending pool.
    pub fn push_block(&mut self, block: Block) -> Result<(), ChainError> {
        let started = Instant::now();
        let result = self.try_push(&block);

        match &result {
            Ok(()) => {
                debug!(height = block.height(), id = %block.id(), "block pushed");
                if let Some(m) = &self.metrics {
                    m.blocks_pushed.inc();
                    m.head_height.set(i64::try_from(block.height()).unwrap_or(i64::MAX));
                    m.block_accept_seconds.observe(started.elapsed().as_secs_f64());
                }
            }
            Err(e) => {
                debug!(height = block.height(), id = %block.id(), reason = %e, "block rejected");
                if let Some(tx) = e.offending_transaction() {
                    self.lock_pool().evict(tx.id());
                }
                if let Some(m) = &self.metrics {
                    m.blocks_rejected.inc();
                }
            }
        }
        result
    }

    fn try_push(&mut self, block: &Block) -> Result<(), ChainError> {
        let previous = self.head().clone();

        if block.id().is_zero() {
            return Err(ChainError::StructuralInvalid("zero block id".to_string()));
        }
        if self.chain.contains(block.id()) || self.store.has_block(block.id())? {
            return Err(ChainError::DuplicateBlock(block.id()));
        }
        if block.previous_block_id() != previous.id() {
            return Err(ChainError::OutOfOrder(format!(
                "previous block {} is not head {}",
                block.previous_block_id(),
                previous.id()
            )));
        }

        self.verify_block(block, &previous, self.clock.now())?;
        self.accept(block, &previous)?;

        self.lock_pool().remove_confirmed(block.transactions());
        self.listeners.notify(ChainEvent::BlockPushed, block);
        self.maybe_trim(block.height());
        Ok(())
    }

    /// Structure, proof, block-local and per-transaction checks.
    fn verify_block(&self, block: &Block, previous: &Block, now: u64) -> Result<(), ChainError> {
        self.engine
            .verify_structure(block, previous, &self.ancestry())?;
        self.engine
            .verify_proof(block, previous, self.ledger.as_ref(), now)?;
        self.validator.validate(block)?;
        for tx in block.transactions() {
            self.ledger
                .validate(tx)
                .map_err(|reason| ChainError::rejected(TxRejection::Invalid, tx, reason))?;
        }
        Ok(())
    }

    /// Saves and applies `block` inside one store transaction.
    fn accept(&mut self, block: &Block, previous: &Block) -> Result<(), ChainError> {
        self.listeners.notify(ChainEvent::BeforeAccept, block);
        self.store.begin()?;
        let applied = self
            .save_and_apply(block)
            .and_then(|()| Ok(self.store.commit()?));
        if let Err(e) = applied {
            self.unwind(previous)?;
            return Err(e);
        }
        Ok(())
    }

    fn save_and_apply(&mut self, block: &Block) -> Result<(), ChainError> {
        self.store.save_block(block)?;
        self.chain.advance(block);
        self.apply_transactions(block)
    }

    fn apply_transactions(&mut self, block: &Block) -> Result<(), ChainError> {
        let height = block.height();
        self.listeners.notify(ChainEvent::BeforeApply, block);
        for tx in block.transactions() {
            if !self.ledger.apply_unconfirmed(tx, height) {
                return Err(ChainError::rejected(
                    TxRejection::DoubleSpend,
                    tx,
                    "sender cannot cover it after earlier transactions",
                ));
            }
        }
        for tx in block.transactions() {
            self.ledger
                .apply(tx, height)
                .map_err(|reason| ChainError::rejected(TxRejection::Invalid, tx, reason))?;
        }
        self.listeners.notify(ChainEvent::AfterApply, block);
        Ok(())
    }

    /// Puts store, derived state and index back to `previous` as head.
    fn unwind(&mut self, previous: &Block) -> Result<(), ChainError> {
        if self.store.in_transaction() {
            self.store.rollback().map_err(|e| {
                error!(error = %e, "store rollback failed");
                ChainError::Fatal(format!("store rollback failed: {e}"))
            })?;
        }
        self.rollback_tables(previous.height());
        self.chain.truncate_to(previous);
        Ok(())
    }

    fn rollback_tables(&mut self, height: u64) {
        self.ledger.rollback(height);
        for table in &mut self.tables {
            table.rollback(height);
        }
    }

    fn truncate_tables(&mut self) {
        self.ledger.truncate();
        for table in &mut self.tables {
            table.truncate();
        }
    }

    fn maybe_trim(&mut self, height: u64) {
        let cfg = self.config();
        if !cfg.trim_derived_tables || height % cfg.trim_frequency.max(1) != 0 {
            return;
        }
        let Some(at) = height.checked_sub(cfg.max_rollback) else {
            return;
        };
        self.ledger.trim(at);
        for table in &mut self.tables {
            table.trim(at);
        }
        self.last_trim_height = at;
        debug!(height, trimmed_to = at, "trimmed derived tables");
    }

    fn add_genesis(&mut self) -> Result<(), ChainError> {
        let genesis = self.genesis.clone();
        self.truncate_tables();
        self.chain.clear();
        self.store.begin()?;
        let applied = self
            .save_and_apply(&genesis)
            .and_then(|()| Ok(self.store.commit()?));
        if let Err(e) = applied {
            if self.store.in_transaction() {
                self.store.rollback()?;
            }
            return Err(ChainError::Fatal(format!("genesis could not be applied: {e}")));
        }
        info!(id = %genesis.id(), "genesis block added");
        Ok(())
    }

    /// Pops blocks off the head until the head is at `target`.
    ///
    /// Returns the popped blocks, highest first; their transactions go
    /// back to the pending pool in that order. A `target` below
    /// [`min_rollback_height`](Self::min_rollback_height) deletes the
    /// blocks and rebuilds derived state with a validating rescan from
    /// genesis.
    pub fn pop_off_to(&mut self, target: u64) -> Result<Vec<Block>, ChainError> {
        let head_height = self.height();
        if target >= head_height {
            return Ok(Vec::new());
        }
        info!(from = head_height, to = target, "popping off blocks");

        let popped = if target < self.min_rollback_height() {
            self.pop_off_with_rescan(target)?
        } else {
            self.pop_off_in_transaction(target)?
        };

        self.requeue(&popped);
        if let Some(m) = &self.metrics {
            m.blocks_popped.inc_by(popped.len() as u64);
            m.head_height.set(i64::try_from(self.height()).unwrap_or(i64::MAX));
        }
        Ok(popped)
    }

    fn pop_off_in_transaction(&mut self, target: u64) -> Result<Vec<Block>, ChainError> {
        self.store.begin()?;
        let mut popped = Vec::new();
        let result = self.pop_while_above(target, &mut popped);

        match result.and_then(|()| Ok(self.store.commit()?)) {
            Ok(()) => {
                self.rollback_tables(target);
                Ok(popped)
            }
            Err(e) => {
                if self.store.in_transaction() {
                    self.store.rollback()?;
                }
                for block in popped.iter().rev() {
                    self.chain.advance(block);
                }
                Err(e)
            }
        }
    }

    fn pop_while_above(&mut self, target: u64, popped: &mut Vec<Block>) -> Result<(), ChainError> {
        while self.height() > target {
            let head = self.head().clone();
            if head.height() == 0 {
                return Err(ChainError::Fatal("cannot pop off the genesis block".to_string()));
            }
            let previous = self
                .store
                .find_block(head.previous_block_id())?
                .ok_or_else(|| {
                    ChainError::Fatal(format!("parent of block {} is missing", head.id()))
                })?;
            self.store.delete_blocks_from(head.id())?;
            self.chain.truncate_to(&previous);
            self.listeners.notify(ChainEvent::BlockPopped, &head);
            popped.push(head);
        }
        Ok(())
    }

    fn pop_off_with_rescan(&mut self, target: u64) -> Result<Vec<Block>, ChainError> {
        warn!(
            target,
            min_rollback_height = self.min_rollback_height(),
            "rollback below trim horizon, rescanning from genesis"
        );
        let first = self.store.find_block_at_height(target + 1)?.ok_or_else(|| {
            ChainError::Fatal(format!("no stored block at height {}", target + 1))
        })?;
        let mut popped = self.store.delete_blocks_from(first.id())?;
        popped.reverse();
        for block in &popped {
            self.listeners.notify(ChainEvent::BlockPopped, block);
        }
        self.scan(0, true)?;
        Ok(popped)
    }

    /// Replays stored blocks from `from` to rebuild derived state.
    ///
    /// With `validate` each block is re-verified (structure, proof,
    /// encodings, transactions). The first block that fails is deleted
    /// together with everything above it, and their transactions are
    /// requeued; the chain then ends at the last good block.
    pub fn scan(&mut self, from: u64, validate: bool) -> Result<(), ChainError> {
        let from = from.min(self.height() + 1);
        info!(from, validate, "scan started");
        self.listeners.notify(ChainEvent::RescanBegin, self.head());

        if from == 0 {
            self.truncate_tables();
            self.chain.clear();
            self.last_trim_height = 0;
        } else {
            let base = self.store.find_block_at_height(from - 1)?.ok_or_else(|| {
                ChainError::Fatal(format!("no stored block at height {}", from - 1))
            })?;
            self.rollback_tables(from - 1);
            self.chain.truncate_to(&base);
        }

        let mut height = from;
        while let Some(block) = self.store.find_block_at_height(height)? {
            let previous = self.head().clone();
            if let Err(e) = self.replay(&block, validate) {
                if e.is_fatal() {
                    return Err(e);
                }
                if height == 0 {
                    return Err(ChainError::Fatal(format!("genesis failed replay: {e}")));
                }
                warn!(height, id = %block.id(), reason = %e, "stored block failed replay, discarding it and its successors");
                self.rollback_tables(previous.height());
                self.chain.truncate_to(&previous);
                let mut discarded = self.store.delete_blocks_from(block.id())?;
                discarded.reverse();
                self.requeue(&discarded);
                break;
            }
            self.listeners.notify(ChainEvent::BlockScanned, &block);
            if height > 0 && height % SCAN_LOG_EVERY == 0 {
                info!(height, "scanning");
            }
            height += 1;
        }

        self.listeners.notify(ChainEvent::RescanEnd, self.head());
        info!(height = self.height(), "scan finished");
        Ok(())
    }

    fn replay(&mut self, block: &Block, validate: bool) -> Result<(), ChainError> {
        if block.height() == 0 {
            if block.id() != self.genesis.id() {
                return Err(ChainError::Fatal("stored genesis does not match".to_string()));
            }
        } else {
            let previous = self.head().clone();
            if block.previous_block_id() != previous.id() {
                return Err(ChainError::StructuralInvalid(format!(
                    "stored block {} does not extend {}",
                    block.id(),
                    previous.id()
                )));
            }
            if validate {
                self.verify_block(block, &previous, block.timestamp())?;
                check_round_trip(block)?;
            }
        }
        self.chain.advance(block);
        self.apply_transactions(block)
    }

    /// Replaces the chain above `common` with `blocks`.
    ///
    /// If any fork block is refused, the fork's blocks are popped again and
    /// the original blocks re-pushed, so the chain ends exactly as it
    /// started.
    pub fn switch_to_fork(
        &mut self,
        common: BlockId,
        blocks: Vec<Block>,
    ) -> Result<ForkSwitch, ChainError> {
        let Some(common_height) = self.chain.height_of(common) else {
            return Err(ChainError::OutOfOrder(format!(
                "common block {common} is no longer canonical"
            )));
        };

        let popped = self.pop_off_to(common_height)?;
        let mut pushed = 0;
        let mut failure = None;
        for block in blocks {
            match self.push_block(block) {
                Ok(()) => pushed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let Some(failure) = failure else {
            if !popped.is_empty() {
                info!(
                    common = %common,
                    popped = popped.len(),
                    pushed,
                    height = self.height(),
                    "switched to heavier fork"
                );
                if let Some(m) = &self.metrics {
                    m.reorgs.inc();
                }
            }
            return Ok(ForkSwitch::Switched { popped, pushed });
        };

        warn!(common = %common, pushed, reason = %failure, "fork block refused, restoring previous chain");
        self.pop_off_to(common_height)?;
        for block in popped.into_iter().rev() {
            let id = block.id();
            self.push_block(block).map_err(|e| {
                error!(id = %id, error = %e, "could not restore popped block");
                ChainError::Fatal(format!("failed to restore block {id}: {e}"))
            })?;
        }
        Ok(ForkSwitch::Restored {
            pushed,
            reason: failure.to_string(),
        })
    }

    /// Deletes every block and starts over from genesis.
    pub fn full_reset(&mut self) -> Result<(), ChainError> {
        warn!(height = self.height(), "full reset requested");
        self.store.delete_all()?;
        self.last_trim_height = 0;
        self.add_genesis()?;
        self.scan(0, false)
    }
}

/// Wire and JSON encodings must reproduce the block's bytes.
fn check_round_trip(block: &Block) -> Result<(), ChainError> {
    let broken = |what: &str, e: &dyn std::fmt::Display| {
        ChainError::StructuralInvalid(format!("{what} round trip failed: {e}"))
    };
    let wire = block
        .to_wire()
        .and_then(|bytes| Block::from_wire(&bytes))
        .map_err(|e| broken("wire", &e))?;
    let json = block
        .to_json()
        .and_then(|text| Block::from_json(&text))
        .map_err(|e| broken("json", &e))?;
    if wire.bytes() != block.bytes() || json.bytes() != block.bytes() {
        return Err(ChainError::StructuralInvalid(format!(
            "block {} changes across encodings",
            block.id()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::crypto;
    use crate::storage::{RocksDbBlockStore, RocksDbConfig};
    use crate::test_support::{self, CREATOR};
    use crate::types::ProofParams;
    use tempfile::TempDir;

    fn work() -> ChainProcessor {
        test_support::processor(test_support::work_config()).0
    }

    #[test]
    fn accepted_chain_grows_height_and_difficulty() {
        let mut p = work();
        test_support::extend(&mut p, 5);
        assert_eq!(p.height(), 5);

        for h in 1..=5 {
            let block = p.block_at(h).unwrap().unwrap();
            let previous = p.block_at(h - 1).unwrap().unwrap();
            assert_eq!(block.height(), previous.height() + 1);
            assert!(block.cumulative_difficulty() > previous.cumulative_difficulty());
            assert_eq!(p.chain().id_at(h), Some(block.id()));
        }
    }

    #[test]
    fn duplicate_block_is_rejected_without_change() {
        let mut p = work();
        test_support::extend(&mut p, 2);
        let head = p.head().clone();
        let err = p.push_block(head.clone()).unwrap_err();
        assert!(matches!(err, ChainError::DuplicateBlock(id) if id == head.id()));
        assert_eq!(p.head().id(), head.id());
    }

    #[test]
    fn block_not_on_head_is_out_of_order() {
        let mut p = work();
        let pay = test_support::payment(CREATOR, "x", 1, 0);
        let stale = test_support::next_block(&p, vec![pay], ProofParams::Work);
        test_support::extend(&mut p, 1);
        let head = p.head().id();
        assert_ne!(stale.id(), head);

        let err = p.push_block(stale).unwrap_err();
        assert!(matches!(err, ChainError::OutOfOrder(_)), "{err}");
        assert!(err.is_transient());
        assert_eq!(p.height(), 1);
        assert_eq!(p.head().id(), head);
    }

    #[test]
    fn tampered_payload_hash_is_structurally_invalid() {
        let mut p = work();
        let pay = test_support::payment(CREATOR, "bob", 10, 1);
        let block = test_support::next_block(&p, vec![pay], ProofParams::Work);

        let mut header = block.header().clone();
        header.payload_hash.0[5] ^= 0x80;
        let tampered =
            Block::from_parts(header, block.transactions().to_vec(), block.proof().clone()).unwrap();
        let head = p.head().id();

        let err = p.push_block(tampered).unwrap_err();
        assert!(matches!(err, ChainError::StructuralInvalid(_)), "{err}");
        assert_eq!(p.head().id(), head);
        assert_eq!(p.store().find_last_block().unwrap().map(|b| b.id()), Some(head));
    }

    #[test]
    fn double_spend_rolls_back_and_evicts() {
        let mut p = work();
        let alice = crypto::account_id("alice");
        let first = test_support::payment("alice", "bob", 600_000, 1);
        let second = test_support::payment("alice", "carol", 600_000, 1);
        {
            let mut pool = p.pool().lock().unwrap();
            pool.add(first.clone());
            pool.add(second.clone());
        }
        let block = test_support::next_block(&p, vec![first, second.clone()], ProofParams::Work);

        let err = p.push_block(block).unwrap_err();
        assert!(matches!(
            err,
            ChainError::TransactionRejected {
                kind: TxRejection::DoubleSpend,
                ..
            }
        ));
        assert_eq!(p.height(), 0);
        assert_eq!(p.ledger().effective_stake(&alice), 1_000_000);
        let pool = p.pool().lock().unwrap();
        assert!(!pool.contains(second.id()));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pushed_block_confirms_pool_transactions() {
        let mut p = work();
        let pay = test_support::payment("alice", "bob", 5, 1);
        p.pool().lock().unwrap().add(pay.clone());
        let block = test_support::next_block(&p, vec![pay.clone()], ProofParams::Work);
        p.push_block(block).unwrap();
        assert!(p.pool().lock().unwrap().is_empty());
        assert_eq!(p.ledger().effective_stake(&crypto::account_id("bob")), 5);
    }

    #[test]
    fn pop_off_to_returns_blocks_and_requeues_in_descending_order() {
        let mut p = work();
        for h in 1..=4u64 {
            let pay = test_support::payment(CREATOR, "bob", h, 0);
            let block = test_support::next_block(&p, vec![pay], ProofParams::Work);
            p.push_block(block).unwrap();
        }
        let bob = crypto::account_id("bob");
        assert_eq!(p.ledger().effective_stake(&bob), 1 + 2 + 3 + 4);

        let popped = p.pop_off_to(1).unwrap();
        assert_eq!(p.height(), 1);
        assert_eq!(popped.iter().map(Block::height).collect::<Vec<_>>(), vec![4, 3, 2]);
        assert_eq!(p.ledger().effective_stake(&bob), 1);

        let pool = p.pool().lock().unwrap();
        let amounts: Vec<u64> = pool.transactions().iter().map(|tx| tx.amount).collect();
        assert_eq!(amounts, vec![4, 3, 2]);
        drop(pool);

        assert!(p.pop_off_to(1).unwrap().is_empty());
        assert!(p.pop_off_to(7).unwrap().is_empty());
    }

    #[test]
    fn popping_notifies_listeners() {
        let popped = Arc::new(AtomicUsize::new(0));
        let counter = popped.clone();
        let mut p = ChainProcessor::builder(
            test_support::work_config(),
            test_support::genesis_config(),
            Box::new(crate::storage::InMemoryBlockStore::new()),
        )
        .listener(ChainEvent::BlockPopped, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .open()
        .unwrap();
        test_support::extend(&mut p, 3);
        p.pop_off_to(0).unwrap();
        assert_eq!(popped.load(Ordering::SeqCst), 3);
        assert_eq!(p.height(), 0);
    }

    #[test]
    fn rollback_below_trim_horizon_rescans() {
        let cfg = ConsensusConfig {
            max_rollback: 2,
            trim_frequency: 2,
            ..test_support::work_config()
        };
        let (mut p, _) = test_support::processor(cfg);
        for h in 1..=6u64 {
            let pay = test_support::payment(CREATOR, "bob", h, 0);
            let block = test_support::next_block(&p, vec![pay], ProofParams::Work);
            p.push_block(block).unwrap();
        }
        assert_eq!(p.min_rollback_height(), 4);

        let popped = p.pop_off_to(3).unwrap();
        assert_eq!(popped.len(), 3);
        assert_eq!(p.height(), 3);
        assert_eq!(p.ledger().effective_stake(&crypto::account_id("bob")), 1 + 2 + 3);
        assert_eq!(p.pool().lock().unwrap().len(), 3);
    }

    #[test]
    fn trimming_disabled_allows_full_rollback() {
        let cfg = ConsensusConfig {
            trim_derived_tables: false,
            ..test_support::work_config()
        };
        let (mut p, _) = test_support::processor(cfg);
        test_support::extend(&mut p, 3);
        assert_eq!(p.min_rollback_height(), 0);
    }

    #[test]
    fn switch_to_heavier_fork() {
        let mut local = work();
        test_support::extend(&mut local, 2);
        let remote = test_support::diverged(4);
        let d1 = local.head().cumulative_difficulty();
        let d2 = remote.head().cumulative_difficulty();
        assert!(d1 < d2);

        let fork: Vec<Block> = (1..=4).map(|h| remote.block_at(h).unwrap().unwrap()).collect();
        let outcome = local.switch_to_fork(local.genesis().id(), fork).unwrap();
        match outcome {
            ForkSwitch::Switched { popped, pushed } => {
                assert_eq!(popped.len(), 2);
                assert_eq!(pushed, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(local.head().id(), remote.head().id());
        assert_eq!(local.head().cumulative_difficulty(), d2);
    }

    #[test]
    fn failed_fork_restores_previous_chain() {
        let mut local = work();
        test_support::extend(&mut local, 2);
        let remote = test_support::diverged(4);
        let head = local.head().clone();

        // Height 3 is missing, so height 4 does not connect.
        let fork: Vec<Block> = [1, 2, 4]
            .into_iter()
            .map(|h| remote.block_at(h).unwrap().unwrap())
            .collect();
        let outcome = local.switch_to_fork(local.genesis().id(), fork).unwrap();
        assert!(matches!(outcome, ForkSwitch::Restored { pushed: 2, .. }));
        assert_eq!(local.head().id(), head.id());
        assert_eq!(local.head().cumulative_difficulty(), head.cumulative_difficulty());
        assert_eq!(local.height(), 2);
    }

    #[test]
    fn fork_from_unknown_common_block_is_refused() {
        let mut local = work();
        let remote = test_support::diverged(2);
        test_support::extend(&mut local, 1);
        let err = local
            .switch_to_fork(remote.head().id(), Vec::new())
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn stake_block_from_the_future_is_deferred() {
        let (mut p, clock) = test_support::processor(test_support::stake_config());
        let block = test_support::next_stake_block(&p);
        clock.set(block.timestamp() - p.config().max_timestamp_skew_secs - 1);
        assert!(p.push_block(block.clone()).unwrap_err().is_transient());

        clock.set(block.timestamp());
        p.push_block(block).unwrap();
        assert_eq!(p.height(), 1);
    }

    #[test]
    fn reopen_replays_stored_chain() {
        let tmp = TempDir::new().unwrap();
        let cfg = RocksDbConfig {
            path: tmp.path().to_string_lossy().to_string(),
            create_if_missing: true,
        };
        let open = |consensus: ConsensusConfig| {
            ChainProcessor::builder(
                consensus,
                test_support::genesis_config(),
                Box::new(RocksDbBlockStore::open(&cfg).unwrap()),
            )
            .open()
        };

        let head = {
            let mut p = open(test_support::work_config()).unwrap();
            let pay = test_support::payment(CREATOR, "bob", 77, 0);
            let block = test_support::next_block(&p, vec![pay], ProofParams::Work);
            p.push_block(block).unwrap();
            test_support::extend(&mut p, 2);
            p.head().clone()
        };

        let validating = ConsensusConfig {
            validate_on_start: true,
            ..test_support::work_config()
        };
        let p = open(validating).unwrap();
        assert_eq!(p.head().id(), head.id());
        assert_eq!(p.ledger().effective_stake(&crypto::account_id("bob")), 77);
        drop(p);

        let err = open(test_support::agreement_config()).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn scan_discards_blocks_that_no_longer_verify() {
        let mut p = work();
        test_support::extend(&mut p, 3);
        // Store a block that does not extend height 3 at height 4.
        let other = test_support::diverged(4);
        let stray = other.block_at(4).unwrap().unwrap();
        p.store.save_block(&stray).unwrap();

        p.scan(0, true).unwrap();
        assert_eq!(p.height(), 3);
        assert!(!p.store().has_block(stray.id()).unwrap());
    }

    #[test]
    fn full_reset_returns_to_genesis() {
        let mut p = work();
        test_support::extend(&mut p, 3);
        p.full_reset().unwrap();
        assert_eq!(p.height(), 0);
        assert_eq!(p.head().id(), p.genesis().id());
        assert_eq!(
            p.ledger().effective_stake(&crypto::account_id("alice")),
            1_000_000
        );
    }

    #[test]
    fn agreement_votes_are_tallied() {
        let (mut p, _) = test_support::processor(test_support::agreement_config());
        for vote in ["x", "y", "y"] {
            let params = ProofParams::Agreement {
                vote: vote.to_string(),
                actor: "me".to_string(),
            };
            let block = test_support::next_block(&p, Vec::new(), params);
            p.push_block(block).unwrap();
        }
        let tally = p.tally_votes().unwrap();
        assert_eq!(tally.winner(), Some("y"));
    }
}
