use serde::Deserialize;

pub use crate::types::ConsensusVariant;

/// Consensus configuration parameters.
///
/// This includes both protocol-level knobs (retarget cadence, target block
/// times) and implementation-level limits (payload bounds, rollback
/// horizon). Every node on a network must agree on the protocol-level
/// values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Which proof the chain runs on.
    pub variant: ConsensusVariant,
    /// Maximum number of transactions per block.
    pub max_block_txs: usize,
    /// Maximum summed byte length of a block's transactions.
    pub max_payload_bytes: usize,
    /// Base target of the genesis block.
    pub initial_base_target: u64,
    /// Retarget ceiling.
    pub max_base_target: u64,
    /// Work and agreement chains retarget every this many blocks.
    pub calibration_interval: u64,
    /// Target spacing of work and agreement blocks, in seconds.
    pub wanted_block_secs: u64,
    /// Target spacing of stake blocks, in seconds.
    pub stake_block_secs: u64,
    /// How far ahead of local time a stake block may be stamped.
    pub max_timestamp_skew_secs: u64,
    /// Trim horizon: derived tables keep enough history to roll back this
    /// many blocks.
    pub max_rollback: u64,
    /// Whether derived tables drop history older than the trim horizon.
    pub trim_derived_tables: bool,
    /// Trim every this many blocks.
    pub trim_frequency: u64,
    /// Re-verify every stored block when the node starts.
    pub validate_on_start: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            variant: ConsensusVariant::Work,
            max_block_txs: 255,
            max_payload_bytes: 255 * 176,
            // roughly 100k hashes per block
            initial_base_target: 184_467_440_737_095,
            max_base_target: u64::MAX / 2,
            calibration_interval: 201,
            wanted_block_secs: 60,
            stake_block_secs: 60,
            max_timestamp_skew_secs: 15,
            max_rollback: 1440,
            trim_derived_tables: true,
            trim_frequency: 1440,
            validate_on_start: false,
        }
    }
}

/// One genesis allocation.
#[derive(Clone, Debug, Deserialize)]
pub struct GenesisAllocation {
    /// 64-char hex account id, or a secret phrase whose account receives
    /// the funds.
    pub recipient: String,
    pub amount: u64,
}

/// Inputs to the deterministic genesis block.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub creator_secret_phrase: String,
    pub timestamp: u64,
    pub allocations: Vec<GenesisAllocation>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            creator_secret_phrase: "forgechain genesis creator".to_string(),
            timestamp: 1_700_000_000,
            allocations: vec![GenesisAllocation {
                recipient: "forgechain devnet forger".to_string(),
                amount: 1_000_000_000,
            }],
        }
    }
}
