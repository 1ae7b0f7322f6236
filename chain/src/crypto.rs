//! Key derivation, signing and verification.
//!
//! Accounts are controlled by Ed25519 keys derived deterministically from
//! a secret phrase: the signing key seed is `sha256(secret_phrase)`. This
//! keeps genesis construction and test fixtures reproducible.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

use crate::types::{AccountId, Hash256, PublicKey, Signature};

/// Derives the signing key controlled by `secret_phrase`.
pub fn signing_key(secret_phrase: &str) -> SigningKey {
    SigningKey::from_bytes(Hash256::compute(secret_phrase.as_bytes()).as_bytes())
}

/// Public key matching `key`.
pub fn public_key(key: &SigningKey) -> PublicKey {
    PublicKey(key.verifying_key().to_bytes().to_vec())
}

/// Account controlled by `secret_phrase`.
pub fn account_id(secret_phrase: &str) -> AccountId {
    public_key(&signing_key(secret_phrase)).account_id()
}

/// Signs `message` with `key`.
pub fn sign(key: &SigningKey, message: &[u8]) -> Signature {
    Signature(key.sign(message).to_bytes().to_vec())
}

/// Verifies a detached signature.
///
/// Malformed keys or signatures verify as `false`; callers treat that the
/// same as a wrong signature.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key.as_bytes()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig) = ed25519_dalek::Signature::from_slice(signature.as_bytes()) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}
