//! Deterministic fixtures shared by the unit tests.

use std::sync::Arc;

use crate::consensus::config::{ConsensusConfig, ConsensusVariant, GenesisAllocation, GenesisConfig};
use crate::consensus::difficulty::Ancestry;
use crate::consensus::genesis::genesis_block;
use crate::consensus::processor::ChainProcessor;
use crate::consensus::proof::ProofEngine;
use crate::consensus::store::BlockStore;
use crate::consensus::{pos, pow};
use crate::crypto;
use crate::storage::InMemoryBlockStore;
use crate::time::ManualClock;
use crate::types::{Block, Candidate, ProofParams, Transaction};

pub const CREATOR: &str = "forgechain test creator";
pub const FORGER: &str = "forgechain test forger";
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
/// Seconds between consecutive fixture blocks.
pub const SPACING: u64 = 10;
pub const FORGER_STAKE: u64 = 1_000_000_000;

/// Signed payment between the accounts of two secret phrases.
pub fn payment(from: &str, to: &str, amount: u64, fee: u64) -> Transaction {
    let key = crypto::signing_key(from);
    Transaction::payment(
        crypto::public_key(&key),
        crypto::account_id(to),
        amount,
        fee,
        GENESIS_TIMESTAMP,
    )
    .signed(&key)
}

pub fn genesis_config() -> GenesisConfig {
    GenesisConfig {
        creator_secret_phrase: CREATOR.to_string(),
        timestamp: GENESIS_TIMESTAMP,
        allocations: vec![
            GenesisAllocation {
                recipient: FORGER.to_string(),
                amount: FORGER_STAKE,
            },
            GenesisAllocation {
                recipient: "alice".to_string(),
                amount: 1_000_000,
            },
        ],
    }
}

/// Work chain where roughly one hash in four wins.
pub fn work_config() -> ConsensusConfig {
    ConsensusConfig {
        variant: ConsensusVariant::Work,
        initial_base_target: u64::MAX / 4,
        ..ConsensusConfig::default()
    }
}

pub fn stake_config() -> ConsensusConfig {
    ConsensusConfig {
        variant: ConsensusVariant::Stake,
        initial_base_target: 1_000_000,
        ..ConsensusConfig::default()
    }
}

pub fn agreement_config() -> ConsensusConfig {
    ConsensusConfig {
        variant: ConsensusVariant::Agreement,
        ..work_config()
    }
}

pub fn stake_genesis() -> Block {
    genesis_block(&stake_config(), &genesis_config()).expect("stake genesis")
}

/// Searches nonces until the candidate meets its target.
pub fn mine(mut candidate: Candidate) -> Block {
    while !pow::search(&mut candidate, 1_000) {}
    candidate.freeze().expect("mined candidate freezes")
}

/// Mines `len - 1` blocks on top of the genesis of `cfg`, `spacing`
/// seconds apart, with transactions and proof parameters per height.
fn mined_chain(
    cfg: &ConsensusConfig,
    len: usize,
    spacing: u64,
    txs_at: impl Fn(u64) -> Vec<Transaction>,
    params_at: impl Fn(u64) -> ProofParams,
) -> Vec<Block> {
    let engine = ProofEngine::new(cfg.clone());
    let mut store = InMemoryBlockStore::new();
    let genesis = genesis_block(cfg, &genesis_config()).expect("genesis");
    store.save_block(&genesis).expect("save genesis");
    let mut chain = vec![genesis];

    while chain.len() < len {
        let previous = chain.last().expect("chain is never empty");
        let height = previous.height() + 1;
        let candidate = engine
            .build_candidate(
                previous,
                previous.timestamp() + spacing,
                txs_at(height),
                params_at(height),
                &Ancestry::Canonical(&store),
            )
            .expect("candidate");
        let block = mine(candidate);
        store.save_block(&block).expect("save block");
        chain.push(block);
    }
    chain
}

/// Genesis plus `len - 1` empty work blocks.
pub fn work_chain(len: usize) -> Vec<Block> {
    mined_chain(&work_config(), len, SPACING, |_| Vec::new(), |_| ProofParams::Work)
}

/// Like [`work_chain`], with one creator payment per block.
pub fn work_chain_with_payments(len: usize) -> Vec<Block> {
    mined_chain(
        &work_config(),
        len,
        SPACING,
        |h| vec![payment(CREATOR, "alice", h, 1)],
        |_| ProofParams::Work,
    )
}

pub fn work_chain_spaced(cfg: &ConsensusConfig, len: usize, spacing: u64) -> Vec<Block> {
    mined_chain(cfg, len, spacing, |_| Vec::new(), |_| ProofParams::Work)
}

/// Genesis plus one agreement block per vote.
pub fn agreement_chain(votes: &[&str]) -> Vec<Block> {
    let votes: Vec<String> = votes.iter().map(|v| v.to_string()).collect();
    mined_chain(
        &agreement_config(),
        votes.len() + 1,
        SPACING,
        |_| Vec::new(),
        |h| ProofParams::Agreement {
            vote: votes[h as usize - 1].clone(),
            actor: "tester".to_string(),
        },
    )
}

/// Height-1 work block carrying `txs`.
pub fn work_block_with(txs: Vec<Transaction>) -> Block {
    let cfg = work_config();
    let genesis = genesis_block(&cfg, &genesis_config()).expect("genesis");
    let candidate = Candidate::build(
        &genesis,
        genesis.timestamp() + SPACING,
        txs,
        ProofParams::Work,
        genesis.base_target(),
        &cfg,
    )
    .expect("candidate");
    mine(candidate)
}

/// Processor over an in-memory store with a clock parked at genesis.
pub fn processor(cfg: ConsensusConfig) -> (ChainProcessor, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(GENESIS_TIMESTAMP));
    let processor = ChainProcessor::builder(cfg, genesis_config(), Box::new(InMemoryBlockStore::new()))
        .clock(clock.clone())
        .open()
        .expect("open processor");
    (processor, clock)
}

/// Mines the next work (or agreement) block on the processor's head.
pub fn next_block(processor: &ChainProcessor, txs: Vec<Transaction>, params: ProofParams) -> Block {
    let head = processor.head();
    let candidate = processor
        .engine()
        .build_candidate(
            head,
            head.timestamp() + SPACING,
            txs,
            params,
            &processor.ancestry(),
        )
        .expect("candidate");
    mine(candidate)
}

/// Pushes `count` empty work blocks.
pub fn extend(processor: &mut ChainProcessor, count: usize) {
    for _ in 0..count {
        let block = next_block(processor, Vec::new(), ProofParams::Work);
        processor.push_block(block).expect("push fixture block");
    }
}

/// Work processor `len` blocks above genesis whose first block pays
/// "fork", so its ids differ from a plain [`extend`]ed chain.
pub fn diverged(len: usize) -> ChainProcessor {
    let (mut processor, _) = processor(work_config());
    let pay = payment(CREATOR, "fork", 1, 0);
    let block = next_block(&processor, vec![pay], ProofParams::Work);
    processor.push_block(block).expect("push diverging block");
    extend(&mut processor, len - 1);
    processor
}

/// Forges the next stake block for [`FORGER`] at its earliest hit time.
pub fn next_stake_block(processor: &ChainProcessor) -> Block {
    let key = crypto::signing_key(FORGER);
    let public_key = crypto::public_key(&key);
    let head = processor.head();
    let gs = pos::generation_signature(
        head.generation_signature().expect("stake head"),
        &public_key,
    );
    let stake = processor.ledger().effective_stake(&public_key.account_id());
    let timestamp = pos::hit_time(head, pos::hit(&gs), stake).expect("forger has stake");
    let mut candidate = processor
        .engine()
        .build_candidate(
            head,
            timestamp,
            Vec::new(),
            ProofParams::Stake {
                generator_public_key: public_key,
            },
            &processor.ancestry(),
        )
        .expect("candidate");
    candidate.sign(&key).expect("sign");
    candidate.freeze().expect("freeze")
}
