//! Deterministic genesis block.
//!
//! Genesis is a pure function of the consensus and genesis configuration:
//! every node on a network derives the same block, and so the same
//! genesis id, without storing it anywhere in advance.

use crate::crypto;
use crate::types::block::{PayloadSummary, encode_layout};
use crate::types::{AccountId, Block, BlockId, Hash256, Header, ProofPayload, Transaction};

use super::agreement::GENESIS_VOTE;
use super::config::{ConsensusConfig, ConsensusVariant, GenesisAllocation, GenesisConfig};
use super::error::ChainError;

/// Account that receives an allocation: a 64-char hex account id, or the
/// account of a secret phrase.
fn allocation_recipient(allocation: &GenesisAllocation) -> AccountId {
    if allocation.recipient.len() == 64 {
        if let Ok(hash) = Hash256::from_hex(&allocation.recipient) {
            return AccountId(hash);
        }
    }
    crypto::account_id(&allocation.recipient)
}

/// Account whose key signs the allocation transactions.
pub fn creator_account(genesis: &GenesisConfig) -> AccountId {
    crypto::account_id(&genesis.creator_secret_phrase)
}

/// Builds the height-0 block for the configured variant.
pub fn genesis_block(
    consensus: &ConsensusConfig,
    genesis: &GenesisConfig,
) -> Result<Block, ChainError> {
    let key = crypto::signing_key(&genesis.creator_secret_phrase);
    let creator = crypto::public_key(&key);

    let transactions: Vec<Transaction> = genesis
        .allocations
        .iter()
        .map(|a| {
            Transaction::payment(
                creator.clone(),
                allocation_recipient(a),
                a.amount,
                0,
                genesis.timestamp,
            )
            .signed(&key)
        })
        .collect();
    let payload = PayloadSummary::of(&transactions);

    let header = Header {
        height: 0,
        timestamp: genesis.timestamp,
        previous_block_id: BlockId(0),
        previous_block_hash: Hash256::ZERO,
        payload_hash: payload.hash,
        payload_length: payload.length_u32(),
        total_amount: payload.total_amount,
        total_fee: payload.total_fee,
        base_target: consensus.initial_base_target,
        cumulative_difficulty: 0,
    };

    let proof = match consensus.variant {
        ConsensusVariant::Work => ProofPayload::Work { nonce: 0 },
        ConsensusVariant::Agreement => ProofPayload::Agreement {
            nonce: 0,
            vote: GENESIS_VOTE.to_string(),
            actor: GENESIS_VOTE.to_string(),
        },
        ConsensusVariant::Stake => {
            let mut proof = ProofPayload::Stake {
                generator_public_key: creator,
                generation_signature: Hash256::ZERO,
                block_signature: None,
            };
            let unsigned = encode_layout(&header, transactions.len(), &proof, false);
            if let ProofPayload::Stake {
                block_signature, ..
            } = &mut proof
            {
                *block_signature = Some(crypto::sign(&key, &unsigned));
            }
            proof
        }
    };

    Block::from_parts(header, transactions, proof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::pos;
    use crate::test_support;

    #[test]
    fn genesis_id_is_deterministic() {
        let cfg = test_support::work_config();
        let genesis = test_support::genesis_config();
        let a = genesis_block(&cfg, &genesis).unwrap();
        let b = genesis_block(&cfg, &genesis).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.bytes(), b.bytes());
        assert_eq!(a.height(), 0);
        assert_eq!(a.cumulative_difficulty(), 0);
    }

    #[test]
    fn variants_and_allocations_change_the_id() {
        let genesis = test_support::genesis_config();
        let work = genesis_block(&test_support::work_config(), &genesis).unwrap();
        let stake = genesis_block(&test_support::stake_config(), &genesis).unwrap();
        assert_ne!(work.id(), stake.id());

        let mut fewer = genesis.clone();
        fewer.allocations.pop();
        let other = genesis_block(&test_support::work_config(), &fewer).unwrap();
        assert_ne!(work.id(), other.id());
    }

    #[test]
    fn stake_genesis_is_signed_by_creator() {
        let block = test_support::stake_genesis();
        let ProofPayload::Stake {
            generator_public_key,
            generation_signature,
            block_signature: Some(sig),
        } = block.proof()
        else {
            panic!("expected a signed stake genesis");
        };
        assert_eq!(*generation_signature, Hash256::ZERO);
        assert!(crypto::verify(generator_public_key, &block.unsigned_bytes(), sig));
        assert_eq!(
            generator_public_key.account_id(),
            creator_account(&test_support::genesis_config())
        );
        assert!(pos::hit(generation_signature) == 0);
    }

    #[test]
    fn hex_allocation_recipients_are_taken_verbatim() {
        let account = crypto::account_id("bob");
        let allocation = GenesisAllocation {
            recipient: account.to_string(),
            amount: 1,
        };
        assert_eq!(allocation_recipient(&allocation), account);
    }
}
