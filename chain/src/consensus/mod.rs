//! Consensus layer.
//!
//! This module holds everything that decides which blocks form the chain:
//!
//! - configuration and the genesis block ([`config`], [`genesis`]),
//! - the three proof variants ([`pow`], [`pos`], [`agreement`]) behind a
//!   single [`proof::ProofEngine`], with difficulty retargeting in
//!   [`difficulty`],
//! - the canonical chain and its processor ([`chain`], [`processor`]),
//!   including rollback and fork switching,
//! - the shared chain handle used by the forger, the fork resolver and the
//!   node ([`context`]),
//! - local block production ([`forger`]),
//! - storage and validation seams ([`store`], [`validator`]).

pub mod agreement;
pub mod chain;
pub mod config;
pub mod context;
pub mod difficulty;
pub mod error;
pub mod events;
pub mod forger;
pub mod genesis;
pub mod pos;
pub mod pow;
pub mod processor;
pub mod proof;
pub mod store;
pub mod validator;

pub use agreement::VoteTally;
pub use chain::Chain;
pub use config::{ConsensusConfig, ConsensusVariant, GenesisAllocation, GenesisConfig};
pub use context::{ChainContext, HeadSummary};
pub use difficulty::Ancestry;
pub use error::{ChainError, CodecError, TxRejection};
pub use events::{ChainEvent, Listener};
pub use forger::{ForgeOutcome, Forger, ForgerStatus, ForgingConfig};
pub use processor::{ChainProcessor, ChainProcessorBuilder, ForkSwitch};
pub use proof::ProofEngine;
pub use store::BlockStore;
pub use validator::{BlockValidator, CombinedValidator};
