//! Storage backends for the chain.
//!
//! This module provides concrete implementations of the
//! [`crate::consensus::store::BlockStore`] trait, including:
//!
//! - an in-memory store ([`mem::InMemoryBlockStore`]) suitable for tests
//!   and devnets,
//! - a RocksDB-backed store ([`rocksdb::RocksDbBlockStore`]) for persistent
//!   nodes.
//!
//! Both honour the transaction-scope contract of `BlockStore`: writes made
//! between `begin` and `commit` become visible atomically, and `rollback`
//! discards them.

use serde::Deserialize;
use thiserror::Error;

pub mod mem;
pub mod rocksdb;

pub use mem::InMemoryBlockStore;
pub use rocksdb::{RocksDbBlockStore, RocksDbConfig};

use crate::consensus::error::CodecError;

/// Storage-level error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying RocksDB error.
    #[error("rocksdb: {0}")]
    RocksDb(#[from] ::rocksdb::Error),
    /// Required column family was not found.
    #[error("missing column family {0}")]
    MissingColumnFamily(&'static str),
    /// Stored bytes failed to decode.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    /// Stored data contradicts itself (height gaps, dangling ids, ...).
    #[error("corrupted storage: {0}")]
    Corrupted(String),
    /// `begin`/`commit`/`rollback` called out of sequence.
    #[error("transaction scope misuse: {0}")]
    TransactionState(&'static str),
}

/// Which block store the node opens.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    RocksDb,
}

/// Storage configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub rocksdb: RocksDbConfig,
}
