//! Top-level configuration for a chain node.
//!
//! This module aggregates configuration for:
//!
//! - consensus parameters (`ConsensusConfig`) and genesis inputs,
//! - storage (backend choice, RocksDB path and creation flags),
//! - peer networking and fork checking (`NetConfig`),
//! - local forging (`ForgingConfig`),
//! - metrics exporter (enable flag + listen address).
//!
//! [`ChainConfig::load`] layers built-in defaults, an optional TOML file
//! and `FORGECHAIN__*` environment variables, e.g.
//! `FORGECHAIN__CONSENSUS__VARIANT=stake`.

use std::net::SocketAddr;
use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::consensus::forger::ForgingConfig;
use crate::consensus::{ConsensusConfig, GenesisConfig};
use crate::net::NetConfig;
use crate::storage::StorageConfig;

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9898)),
        }
    }
}

/// Top-level configuration for a chain node.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub consensus: ConsensusConfig,
    pub genesis: GenesisConfig,
    pub storage: StorageConfig,
    pub net: NetConfig,
    pub forging: ForgingConfig,
    pub metrics: MetricsConfig,
}

impl ChainConfig {
    pub const ENV_PREFIX: &'static str = "FORGECHAIN";

    /// Loads defaults, then `path` (TOML) if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
