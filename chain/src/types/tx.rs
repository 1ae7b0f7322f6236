// chain/src/types/tx.rs

//! Transaction types for the consensus layer.
//!
//! The consensus core treats transactions mostly as opaque: it needs their
//! identifier, byte encoding, amount and fee, and a duplicate-detection
//! key. The concrete ledger semantics live in [`crate::ledger`].
//!
//! Two transaction kinds exist:
//!
//! - plain payments between accounts, and
//! - alias assignments, which bind a unique, case-insensitive name to the
//!   sender account.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use super::{AccountId, ByteWriter, Hash256, PublicKey, Signature, TxId};
use crate::crypto;

/// Maximum alias length in characters.
pub const MAX_ALIAS_LEN: usize = 100;

/// Kind-specific transaction payload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxBody {
    /// Moves `amount` from the sender to the recipient.
    Payment,
    /// Binds `alias` to the sender account.
    ///
    /// Aliases are unique per chain regardless of case; two alias
    /// assignments for the same name can never land in one block.
    AliasAssignment { alias: String },
}

impl TxBody {
    fn tag(&self) -> u8 {
        match self {
            TxBody::Payment => 0,
            TxBody::AliasAssignment { .. } => 1,
        }
    }
}

/// A signed ledger transaction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub body: TxBody,
    pub sender_public_key: PublicKey,
    pub recipient: AccountId,
    pub amount: u64,
    pub fee: u64,
    /// Creation time, seconds since Unix epoch.
    pub timestamp: u64,
    /// Sender signature over [`Transaction::unsigned_bytes`].
    #[serde(default)]
    pub signature: Option<Signature>,
}

impl Transaction {
    /// Creates an unsigned payment.
    pub fn payment(
        sender_public_key: PublicKey,
        recipient: AccountId,
        amount: u64,
        fee: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            body: TxBody::Payment,
            sender_public_key,
            recipient,
            amount,
            fee,
            timestamp,
            signature: None,
        }
    }

    /// Creates an unsigned alias assignment. The recipient is the sender.
    pub fn alias_assignment(
        sender_public_key: PublicKey,
        alias: impl Into<String>,
        fee: u64,
        timestamp: u64,
    ) -> Self {
        let recipient = sender_public_key.account_id();
        Self {
            body: TxBody::AliasAssignment {
                alias: alias.into(),
            },
            sender_public_key,
            recipient,
            amount: 0,
            fee,
            timestamp,
            signature: None,
        }
    }

    /// Account that pays for this transaction.
    pub fn sender(&self) -> AccountId {
        self.sender_public_key.account_id()
    }

    /// Byte layout without the signature; this is what gets signed.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        self.layout(false)
    }

    /// Full byte layout, including the signature when present.
    pub fn bytes(&self) -> Vec<u8> {
        self.layout(true)
    }

    fn layout(&self, with_signature: bool) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(160);
        w.u8(self.body.tag())
            .u64(self.timestamp)
            .prefixed(self.sender_public_key.as_bytes())
            .raw(self.recipient.as_hash().as_bytes())
            .u64(self.amount)
            .u64(self.fee);
        if let TxBody::AliasAssignment { alias } = &self.body {
            w.prefixed(alias.as_bytes());
        }
        if with_signature {
            let sig = self.signature.as_ref().map(Signature::as_bytes).unwrap_or(&[]);
            w.prefixed(sig);
        }
        w.finish()
    }

    /// Encoded length in bytes.
    pub fn size(&self) -> usize {
        self.bytes().len()
    }

    /// Transaction identifier derived from the full byte layout.
    pub fn id(&self) -> TxId {
        TxId::from_hash(&Hash256::compute(&self.bytes()))
    }

    /// Signs the transaction in place.
    pub fn sign(&mut self, key: &SigningKey) {
        self.signature = Some(crypto::sign(key, &self.unsigned_bytes()));
    }

    /// Convenience: sign and return.
    pub fn signed(mut self, key: &SigningKey) -> Self {
        self.sign(key);
        self
    }

    /// Whether the signature is present and valid for the sender key.
    pub fn verify_signature(&self) -> bool {
        match &self.signature {
            Some(sig) => crypto::verify(&self.sender_public_key, &self.unsigned_bytes(), sig),
            None => false,
        }
    }

    /// Key under which two transactions in one block conflict.
    ///
    /// Payments never conflict with each other; alias assignments conflict
    /// when they name the same alias, ignoring case.
    pub fn duplicate_key(&self) -> Option<String> {
        match &self.body {
            TxBody::Payment => None,
            TxBody::AliasAssignment { alias } => Some(format!("alias:{}", alias.to_lowercase())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{public_key, signing_key};

    fn payment(amount: u64) -> Transaction {
        let key = signing_key("sender");
        Transaction::payment(
            public_key(&key),
            crate::crypto::account_id("recipient"),
            amount,
            1,
            1_700_000_000,
        )
        .signed(&key)
    }

    #[test]
    fn id_depends_on_content_and_signature() {
        let a = payment(10);
        let b = payment(11);
        assert_ne!(a.id(), b.id());

        let mut unsigned = a.clone();
        unsigned.signature = None;
        assert_ne!(unsigned.id(), a.id());
    }

    #[test]
    fn signature_covers_amount() {
        let mut tx = payment(10);
        assert!(tx.verify_signature());
        tx.amount = 1_000;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn alias_duplicate_key_ignores_case() {
        let key = signing_key("sender");
        let a = Transaction::alias_assignment(public_key(&key), "Forge", 1, 1);
        let b = Transaction::alias_assignment(public_key(&key), "forge", 1, 2);
        assert_eq!(a.duplicate_key(), b.duplicate_key());
        assert_eq!(payment(1).duplicate_key(), None);
        assert_eq!(a.recipient, a.sender());
    }

    #[test]
    fn json_keeps_bytes_identical() {
        let tx = payment(42);
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bytes(), tx.bytes());
        assert_eq!(back.id(), tx.id());
    }
}
