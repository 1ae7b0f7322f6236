// chain/src/types/block.rs

//! Block types, byte layout and identity.
//!
//! A [`Block`] is immutable: it is only ever produced by freezing a
//! [`Candidate`](super::Candidate) whose proof is final, or by decoding
//! bytes received from a peer or read from storage. Its identifier and
//! hash are computed once at construction.
//!
//! Three encodings exist:
//!
//! - the **byte layout** ([`Block::bytes`]), an explicit little-endian
//!   field sequence that is hashed to produce the block id and that PoS
//!   generators sign (minus the signature itself),
//! - the **wire encoding** ([`Block::to_wire`]), **bincode 2** through the
//!   `serde` integration with an explicit `standard()` config, used by
//!   storage backends,
//! - the **JSON encoding** ([`Block::to_json`]), used by the peer protocol
//!   and the HTTP API.

use serde::{Deserialize, Serialize};

use super::{BlockId, ByteWriter, Hash256, PublicKey, Signature, Transaction};
use crate::consensus::difficulty;
use crate::consensus::error::{ChainError, CodecError};

/// Which proof a chain runs on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusVariant {
    /// Proof of work.
    #[default]
    Work,
    /// Proof of stake.
    Stake,
    /// Proof of work carrying an out-of-band vote (Byzantine agreement
    /// overlay).
    Agreement,
}

/// Variant-specific proof fields.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProofPayload {
    Work {
        nonce: u64,
    },
    Stake {
        generator_public_key: PublicKey,
        /// `sha256(previous.generation_signature || generator_public_key)`.
        generation_signature: Hash256,
        /// Generator signature over the unsigned byte layout. Absent only
        /// on candidates that have not been signed yet.
        #[serde(default)]
        block_signature: Option<Signature>,
    },
    Agreement {
        nonce: u64,
        vote: String,
        /// Distinguishes two honest actors casting the same vote at the
        /// same height.
        actor: String,
    },
}

impl ProofPayload {
    pub fn variant(&self) -> ConsensusVariant {
        match self {
            ProofPayload::Work { .. } => ConsensusVariant::Work,
            ProofPayload::Stake { .. } => ConsensusVariant::Stake,
            ProofPayload::Agreement { .. } => ConsensusVariant::Agreement,
        }
    }

    /// Whether every field the block id depends on is set.
    pub fn is_finalized(&self) -> bool {
        match self {
            ProofPayload::Stake {
                block_signature, ..
            } => block_signature.is_some(),
            ProofPayload::Work { .. } | ProofPayload::Agreement { .. } => true,
        }
    }

    /// Digest binding an agreement block's vote and actor into its bytes.
    pub fn agreement_digest(vote: &str, actor: &str) -> Hash256 {
        let mut w = ByteWriter::default();
        w.prefixed(vote.as_bytes()).prefixed(actor.as_bytes());
        Hash256::compute(&w.finish())
    }

    fn tag(&self) -> u8 {
        match self {
            ProofPayload::Work { .. } => 0,
            ProofPayload::Stake { .. } => 1,
            ProofPayload::Agreement { .. } => 2,
        }
    }
}

/// Block header: linkage, payload commitment and difficulty fields.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Height of this block; genesis is 0.
    pub height: u64,
    /// Seconds since Unix epoch.
    pub timestamp: u64,
    pub previous_block_id: BlockId,
    /// `sha256(previous.bytes())`; all zero for genesis.
    pub previous_block_hash: Hash256,
    /// `sha256` over the concatenated transaction bytes.
    pub payload_hash: Hash256,
    /// Summed byte length of all transactions.
    pub payload_length: u32,
    pub total_amount: u64,
    pub total_fee: u64,
    /// Difficulty threshold this block's proof must beat.
    pub base_target: u64,
    /// `previous.cumulative_difficulty + 2^64 / base_target`.
    #[serde(with = "super::u128_string")]
    pub cumulative_difficulty: u128,
}

/// Commitment to an ordered list of transactions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PayloadSummary {
    pub hash: Hash256,
    pub length: usize,
    pub total_amount: u64,
    pub total_fee: u64,
}

impl PayloadSummary {
    pub fn of(transactions: &[Transaction]) -> Self {
        let encoded: Vec<Vec<u8>> = transactions.iter().map(Transaction::bytes).collect();
        let hash = Hash256::compute_parts(encoded.iter().map(Vec::as_slice));
        Self {
            hash,
            length: encoded.iter().map(Vec::len).sum(),
            total_amount: transactions
                .iter()
                .fold(0u64, |acc, tx| acc.saturating_add(tx.amount)),
            total_fee: transactions
                .iter()
                .fold(0u64, |acc, tx| acc.saturating_add(tx.fee)),
        }
    }

    pub fn length_u32(&self) -> u32 {
        u32::try_from(self.length).unwrap_or(u32::MAX)
    }
}

/// Writes the byte layout shared by blocks and candidates.
pub(crate) fn encode_layout(
    header: &Header,
    tx_count: usize,
    proof: &ProofPayload,
    with_signature: bool,
) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(256);
    w.u64(header.height)
        .u64(header.timestamp)
        .u64(header.previous_block_id.0)
        .raw(header.previous_block_hash.as_bytes())
        .raw(header.payload_hash.as_bytes())
        .u32(header.payload_length)
        .u32(u32::try_from(tx_count).unwrap_or(u32::MAX))
        .u64(header.total_amount)
        .u64(header.total_fee)
        .u64(header.base_target)
        .u128(header.cumulative_difficulty)
        .u8(proof.tag());

    match proof {
        ProofPayload::Work { nonce } => {
            w.u64(*nonce);
        }
        ProofPayload::Stake {
            generator_public_key,
            generation_signature,
            block_signature,
        } => {
            w.prefixed(generator_public_key.as_bytes())
                .raw(generation_signature.as_bytes());
            if with_signature {
                let sig = block_signature.as_ref().map(Signature::as_bytes).unwrap_or(&[]);
                w.prefixed(sig);
            }
        }
        ProofPayload::Agreement { nonce, vote, actor } => {
            w.u64(*nonce)
                .raw(ProofPayload::agreement_digest(vote, actor).as_bytes());
        }
    }
    w.finish()
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    header: Header,
    transactions: Vec<Transaction>,
    proof: ProofPayload,
}

/// A finalized block.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBlock", into = "RawBlock")]
pub struct Block {
    header: Header,
    transactions: Vec<Transaction>,
    proof: ProofPayload,
    hash: Hash256,
    id: BlockId,
}

impl TryFrom<RawBlock> for Block {
    type Error = ChainError;

    fn try_from(raw: RawBlock) -> Result<Self, Self::Error> {
        Block::from_parts(raw.header, raw.transactions, raw.proof)
    }
}

impl From<Block> for RawBlock {
    fn from(block: Block) -> Self {
        RawBlock {
            header: block.header,
            transactions: block.transactions,
            proof: block.proof,
        }
    }
}

impl Block {
    /// Assembles a block, fixing its hash and id.
    ///
    /// Fails with [`ChainError::NotYetFinalized`] when the proof still
    /// lacks its signature.
    pub(crate) fn from_parts(
        header: Header,
        transactions: Vec<Transaction>,
        proof: ProofPayload,
    ) -> Result<Self, ChainError> {
        if !proof.is_finalized() {
            return Err(ChainError::NotYetFinalized);
        }
        let hash = Hash256::compute(&encode_layout(&header, transactions.len(), &proof, true));
        Ok(Self {
            id: BlockId::from_hash(&hash),
            hash,
            header,
            transactions,
            proof,
        })
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    /// `sha256(self.bytes())`.
    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn previous_block_id(&self) -> BlockId {
        self.header.previous_block_id
    }

    pub fn base_target(&self) -> u64 {
        self.header.base_target
    }

    pub fn cumulative_difficulty(&self) -> u128 {
        self.header.cumulative_difficulty
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn into_transactions(self) -> Vec<Transaction> {
        self.transactions
    }

    pub fn proof(&self) -> &ProofPayload {
        &self.proof
    }

    pub fn variant(&self) -> ConsensusVariant {
        self.proof.variant()
    }

    /// Generation signature of a stake block.
    pub fn generation_signature(&self) -> Option<&Hash256> {
        match &self.proof {
            ProofPayload::Stake {
                generation_signature,
                ..
            } => Some(generation_signature),
            _ => None,
        }
    }

    /// The full byte layout this block's hash and id are computed over.
    pub fn bytes(&self) -> Vec<u8> {
        encode_layout(&self.header, self.transactions.len(), &self.proof, true)
    }

    /// The byte layout minus the block signature.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        encode_layout(&self.header, self.transactions.len(), &self.proof, false)
    }

    /// Fork-choice comparator: strictly greater cumulative difficulty.
    pub fn better_than(&self, other: &Block) -> bool {
        self.header.cumulative_difficulty > other.header.cumulative_difficulty
    }

    /// Checks linkage to `previous`, the payload commitment, the totals
    /// and the cumulative difficulty. Proof validity is not checked here.
    pub fn verify_structure(&self, previous: &Block) -> Result<(), ChainError> {
        let h = &self.header;
        let invalid = |msg: String| Err(ChainError::StructuralInvalid(msg));

        if h.height != previous.height() + 1 {
            return invalid(format!(
                "height {} does not follow previous height {}",
                h.height,
                previous.height()
            ));
        }
        if h.previous_block_id != previous.id() {
            return invalid(format!(
                "previous block id {} does not match {}",
                h.previous_block_id,
                previous.id()
            ));
        }
        if h.previous_block_hash != previous.hash() {
            return invalid("previous block hash mismatch".to_string());
        }
        if h.timestamp <= previous.timestamp() {
            return invalid(format!(
                "timestamp {} not after previous {}",
                h.timestamp,
                previous.timestamp()
            ));
        }

        let payload = PayloadSummary::of(&self.transactions);
        if payload.hash != h.payload_hash {
            return invalid("payload hash mismatch".to_string());
        }
        if payload.length_u32() != h.payload_length {
            return invalid(format!(
                "payload length {} != declared {}",
                payload.length, h.payload_length
            ));
        }
        if payload.total_amount != h.total_amount || payload.total_fee != h.total_fee {
            return invalid("transaction totals mismatch".to_string());
        }

        if h.base_target == 0 {
            return invalid("zero base target".to_string());
        }
        let expected =
            difficulty::next_cumulative_difficulty(previous.cumulative_difficulty(), h.base_target);
        if h.cumulative_difficulty != expected {
            return invalid(format!(
                "cumulative difficulty {} != expected {expected}",
                h.cumulative_difficulty
            ));
        }
        Ok(())
    }

    /// Encodes the block with bincode 2 (`standard()` config).
    pub fn to_wire(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    /// Decodes a block produced by [`Block::to_wire`].
    pub fn from_wire(bytes: &[u8]) -> Result<Self, CodecError> {
        let (block, read): (Block, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        if read != bytes.len() {
            return Err(CodecError::TrailingBytes(bytes.len() - read));
        }
        Ok(block)
    }

    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(json)?)
    }
}
