//! Mutable block under construction.
//!
//! Forgers build a [`Candidate`] on top of the current head, then search
//! for a valid proof by mutating it in place (nonce, timestamp, signature).
//! Only [`Candidate::freeze`] turns it into an immutable [`Block`]; a
//! candidate is never aliased with an accepted block.

use ed25519_dalek::SigningKey;

use super::block::{PayloadSummary, encode_layout};
use super::{Block, BlockId, Hash256, Header, ProofPayload, PublicKey, Transaction};
use crate::consensus::config::ConsensusConfig;
use crate::consensus::error::ChainError;
use crate::consensus::{difficulty, pos};
use crate::crypto;

/// Variant inputs a forger supplies when starting a candidate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProofParams {
    Work,
    Stake { generator_public_key: PublicKey },
    Agreement { vote: String, actor: String },
}

/// A block whose proof is still being searched for.
#[derive(Clone, Debug)]
pub struct Candidate {
    header: Header,
    transactions: Vec<Transaction>,
    proof: ProofPayload,
    previous_timestamp: u64,
}

impl Candidate {
    /// Builds a candidate on top of `previous`.
    ///
    /// Computes the payload commitment, totals, height and cumulative
    /// difficulty. `base_target` is the already-retargeted value for the
    /// new height.
    pub fn build(
        previous: &Block,
        timestamp: u64,
        transactions: Vec<Transaction>,
        params: ProofParams,
        base_target: u64,
        limits: &ConsensusConfig,
    ) -> Result<Self, ChainError> {
        let payload = PayloadSummary::of(&transactions);
        if transactions.len() > limits.max_block_txs || payload.length > limits.max_payload_bytes
        {
            return Err(ChainError::PayloadTooLarge {
                tx_count: transactions.len(),
                payload_bytes: payload.length,
                max_txs: limits.max_block_txs,
                max_bytes: limits.max_payload_bytes,
            });
        }
        if timestamp <= previous.timestamp() {
            return Err(ChainError::InvalidTimestamp {
                timestamp,
                previous: previous.timestamp(),
            });
        }

        let proof = match params {
            ProofParams::Work => ProofPayload::Work { nonce: 0 },
            ProofParams::Stake {
                generator_public_key,
            } => {
                let prev_sig = previous.generation_signature().ok_or_else(|| {
                    ChainError::StructuralInvalid(
                        "stake candidate on top of a non-stake block".to_string(),
                    )
                })?;
                ProofPayload::Stake {
                    generation_signature: pos::generation_signature(
                        prev_sig,
                        &generator_public_key,
                    ),
                    generator_public_key,
                    block_signature: None,
                }
            }
            ProofParams::Agreement { vote, actor } => ProofPayload::Agreement {
                nonce: 0,
                vote,
                actor,
            },
        };

        let header = Header {
            height: previous.height() + 1,
            timestamp,
            previous_block_id: previous.id(),
            previous_block_hash: previous.hash(),
            payload_hash: payload.hash,
            payload_length: payload.length_u32(),
            total_amount: payload.total_amount,
            total_fee: payload.total_fee,
            base_target,
            cumulative_difficulty: difficulty::next_cumulative_difficulty(
                previous.cumulative_difficulty(),
                base_target,
            ),
        };

        Ok(Self {
            header,
            transactions,
            proof,
            previous_timestamp: previous.timestamp(),
        })
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

    pub fn base_target(&self) -> u64 {
        self.header.base_target
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn proof(&self) -> &ProofPayload {
        &self.proof
    }

    pub fn nonce(&self) -> Option<u64> {
        match &self.proof {
            ProofPayload::Work { nonce } | ProofPayload::Agreement { nonce, .. } => Some(*nonce),
            ProofPayload::Stake { .. } => None,
        }
    }

    /// Advances the nonce of a work or agreement candidate.
    pub fn inc_nonce(&mut self) {
        if let ProofPayload::Work { nonce } | ProofPayload::Agreement { nonce, .. } =
            &mut self.proof
        {
            *nonce = nonce.wrapping_add(1);
        }
    }

    /// Re-stamps the candidate. Drops any signature already applied.
    pub fn set_timestamp(&mut self, timestamp: u64) -> Result<(), ChainError> {
        if timestamp <= self.previous_timestamp {
            return Err(ChainError::InvalidTimestamp {
                timestamp,
                previous: self.previous_timestamp,
            });
        }
        self.header.timestamp = timestamp;
        if let ProofPayload::Stake {
            block_signature, ..
        } = &mut self.proof
        {
            *block_signature = None;
        }
        Ok(())
    }

    /// Byte layout as it currently stands.
    pub fn bytes(&self) -> Vec<u8> {
        encode_layout(&self.header, self.transactions.len(), &self.proof, true)
    }

    pub fn unsigned_bytes(&self) -> Vec<u8> {
        encode_layout(&self.header, self.transactions.len(), &self.proof, false)
    }

    /// `sha256(bytes)`, the digest proof-of-work compares against.
    pub fn hash(&self) -> Hash256 {
        Hash256::compute(&self.bytes())
    }

    /// Identifier the frozen block will carry.
    pub fn id(&self) -> Result<BlockId, ChainError> {
        if !self.proof.is_finalized() {
            return Err(ChainError::NotYetFinalized);
        }
        Ok(BlockId::from_hash(&self.hash()))
    }

    /// Signs a stake candidate with the generator key.
    pub fn sign(&mut self, key: &SigningKey) -> Result<(), ChainError> {
        let unsigned = self.unsigned_bytes();
        match &mut self.proof {
            ProofPayload::Stake {
                generator_public_key,
                block_signature,
                ..
            } => {
                if crypto::public_key(key) != *generator_public_key {
                    return Err(ChainError::ProofInvalid(
                        "signing key does not match generator".to_string(),
                    ));
                }
                *block_signature = Some(crypto::sign(key, &unsigned));
                Ok(())
            }
            _ => Err(ChainError::ProofInvalid(
                "only stake candidates carry a block signature".to_string(),
            )),
        }
    }

    /// Produces the immutable block.
    pub fn freeze(self) -> Result<Block, ChainError> {
        Block::from_parts(self.header, self.transactions, self.proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn build_rejects_non_increasing_timestamp() {
        let genesis = test_support::work_chain(1).remove(0);
        let cfg = ConsensusConfig::default();
        let err = Candidate::build(
            &genesis,
            genesis.timestamp(),
            Vec::new(),
            ProofParams::Work,
            genesis.base_target(),
            &cfg,
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::InvalidTimestamp { .. }));
    }

    #[test]
    fn build_rejects_oversized_payload() {
        let genesis = test_support::work_chain(1).remove(0);
        let cfg = ConsensusConfig {
            max_block_txs: 1,
            ..ConsensusConfig::default()
        };
        let txs = vec![test_support::payment("a", "b", 1, 0), test_support::payment("a", "b", 2, 0)];
        let err = Candidate::build(
            &genesis,
            genesis.timestamp() + 1,
            txs,
            ProofParams::Work,
            genesis.base_target(),
            &cfg,
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::PayloadTooLarge { tx_count: 2, .. }));
    }

    #[test]
    fn stake_candidate_has_no_id_until_signed() {
        let genesis = test_support::stake_genesis();
        let key = crypto::signing_key(test_support::FORGER);
        let mut candidate = Candidate::build(
            &genesis,
            genesis.timestamp() + 10,
            Vec::new(),
            ProofParams::Stake {
                generator_public_key: crypto::public_key(&key),
            },
            genesis.base_target(),
            &ConsensusConfig::default(),
        )
        .unwrap();

        assert!(matches!(candidate.id(), Err(ChainError::NotYetFinalized)));
        assert!(matches!(
            candidate.clone().freeze(),
            Err(ChainError::NotYetFinalized)
        ));

        candidate.sign(&key).unwrap();
        let id = candidate.id().unwrap();
        assert_eq!(candidate.freeze().unwrap().id(), id);
    }

    #[test]
    fn retimestamp_drops_signature() {
        let genesis = test_support::stake_genesis();
        let key = crypto::signing_key(test_support::FORGER);
        let mut candidate = Candidate::build(
            &genesis,
            genesis.timestamp() + 10,
            Vec::new(),
            ProofParams::Stake {
                generator_public_key: crypto::public_key(&key),
            },
            genesis.base_target(),
            &ConsensusConfig::default(),
        )
        .unwrap();
        candidate.sign(&key).unwrap();
        candidate.set_timestamp(genesis.timestamp() + 11).unwrap();
        assert!(candidate.id().is_err());
        assert!(candidate.set_timestamp(genesis.timestamp()).is_err());
    }

    #[test]
    fn nonce_changes_the_hash() {
        let genesis = test_support::work_chain(1).remove(0);
        let mut candidate = Candidate::build(
            &genesis,
            genesis.timestamp() + 1,
            Vec::new(),
            ProofParams::Work,
            genesis.base_target(),
            &ConsensusConfig::default(),
        )
        .unwrap();
        let before = candidate.hash();
        candidate.inc_nonce();
        assert_eq!(candidate.nonce(), Some(1));
        assert_ne!(candidate.hash(), before);
    }
}
