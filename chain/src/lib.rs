//! Forgechain library crate.
//!
//! A single-process block chain node core that runs one of three
//! consensus variants (proof of work, proof of stake, or a work-based
//! agreement chain). The crate provides:
//!
//! - domain types and their byte layouts (`types`),
//! - key derivation and signatures (`crypto`),
//! - the consensus layer: proof engines, chain processor, forger (`consensus`),
//! - the balance ledger and other derived tables (`ledger`),
//! - the pending transaction pool (`pool`),
//! - block storage backends (`storage`),
//! - peer protocol and fork resolution (`net`),
//! - Prometheus metrics (`metrics`),
//! - and the top-level node configuration (`config`).
//!
//! The `forgechain-node` binary composes these into a running node.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod ledger;
pub mod metrics;
pub mod net;
pub mod pool;
pub mod storage;
pub mod time;
pub mod types;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use config::{ChainConfig, MetricsConfig};

pub use consensus::{
    BlockStore, BlockValidator, ChainContext, ChainError, ChainProcessor, CombinedValidator,
    ConsensusConfig, ForgeOutcome, Forger, ForgingConfig, ForkSwitch, GenesisConfig, HeadSummary,
};

pub use ledger::{BalanceLedger, DerivedTable, Ledger};
pub use net::{BlockPropagator, ForkOutcome, ForkResolver, HttpPeerNetwork, NetConfig, PeerNetwork};
pub use pool::PendingPool;
pub use storage::{InMemoryBlockStore, RocksDbBlockStore, RocksDbConfig, StorageConfig, StorageError};
pub use time::{Clock, SystemClock};

pub use metrics::{ConsensusMetrics, MetricsRegistry, run_prometheus_http_server};

pub use types::*;
