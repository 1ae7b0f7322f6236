//! Core domain types used by the chain
//!
//! This module defines strongly-typed hashes, account identifiers, block
//! and transaction identifiers, and the key/signature wrappers that are
//! shared across the chain implementation. The goal is to avoid "naked"
//! byte buffers and integers in public APIs and instead use
//! domain-specific newtypes.
//!
//! Hashes, keys and signatures serialize as lowercase hex in
//! human-readable formats (JSON) and as raw bytes in binary formats
//! (bincode). Block and transaction identifiers serialize as decimal
//! strings in JSON so that 64-bit values survive JavaScript clients.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

pub mod block;
pub mod candidate;
pub mod tx;

pub use block::{Block, ConsensusVariant, Header, ProofPayload};
pub use candidate::{Candidate, ProofParams};
pub use tx::{Transaction, TxBody};

/// Length in bytes of all 256-bit hash types used in this module.
pub const HASH_LEN: usize = 32;

/// Strongly-typed 256-bit hash wrapper (SHA-256).
///
/// This type is used as the backing representation for all fixed-size
/// hashes in the chain (block hashes, payload hashes, generation
/// signatures, account identifiers). It is always exactly [`HASH_LEN`]
/// bytes long.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// The all-zero hash, used as the "previous block hash" of genesis.
    pub const ZERO: Hash256 = Hash256([0u8; HASH_LEN]);

    /// Computes a new [`Hash256`] as the SHA-256 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        Hash256(Sha256::digest(data).into())
    }

    /// Computes the SHA-256 digest of several byte slices fed in order.
    ///
    /// Equivalent to hashing their concatenation without allocating it.
    pub fn compute_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Hash256(hasher.finalize().into())
    }

    /// Returns the underlying 32-byte hash as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Interprets the first 8 bytes of the digest as a little-endian `u64`.
    ///
    /// This is the "hit" used by the proof engines and the derivation
    /// rule for block and transaction identifiers.
    pub fn low_u64(&self) -> u64 {
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(low)
    }

    /// Parses a 64-character hex string into a hash.
    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid hex: {e}"))?;
        let arr: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| format!("expected {HASH_LEN} bytes"))?;
        Ok(Hash256(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Hash256::from_hex(&s).map_err(D::Error::custom)
        } else {
            Ok(Hash256(<[u8; HASH_LEN]>::deserialize(deserializer)?))
        }
    }
}

/// Account identifier (SHA-256 of the account's public key).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AccountId(pub Hash256);

impl AccountId {
    /// Derives an [`AccountId`] from an encoded public key.
    pub fn from_public_key(pk: &PublicKey) -> Self {
        AccountId(Hash256::compute(pk.as_bytes()))
    }

    /// Returns the underlying [`Hash256`] backing this account identifier.
    pub fn as_hash(&self) -> &Hash256 {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AccountId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash256::from_hex(s).map(AccountId)
    }
}

/// Ed25519 public key bytes, wrapped to avoid naked `Vec<u8>`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct PublicKey(pub Vec<u8>);

impl PublicKey {
    /// Returns the raw public key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Account that owns this key.
    pub fn account_id(&self) -> AccountId {
        AccountId::from_public_key(self)
    }
}

/// Largest public key or signature accepted from JSON or the wire.
pub const MAX_KEY_FIELD_BYTES: usize = 256;

/// Detached Ed25519 signature bytes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    /// Returns the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

macro_rules! hex_bytes_serde {
    ($name:ident) => {
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&hex::encode(&self.0))
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let bytes = if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    hex::decode(&s).map_err(D::Error::custom)?
                } else {
                    Vec::<u8>::deserialize(deserializer)?
                };
                if bytes.len() > MAX_KEY_FIELD_BYTES {
                    return Err(D::Error::custom(format!(
                        "{} of {} bytes exceeds {MAX_KEY_FIELD_BYTES}",
                        stringify!($name),
                        bytes.len()
                    )));
                }
                Ok($name(bytes))
            }
        }
    };
}

hex_bytes_serde!(PublicKey);
hex_bytes_serde!(Signature);

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(pub u64);

        impl $name {
            /// Derives the identifier from a digest: its low 8 bytes, little-endian.
            pub fn from_hash(hash: &Hash256) -> Self {
                $name(hash.low_u64())
            }

            /// Whether this is the reserved zero value.
            pub fn is_zero(&self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map($name)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.collect_str(&self.0)
                } else {
                    serializer.serialize_u64(self.0)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(D::Error::custom)
                } else {
                    u64::deserialize(deserializer).map($name)
                }
            }
        }
    };
}

numeric_id!(
    /// Block identifier: the low 8 bytes of `sha256(block.bytes())`.
    BlockId
);

numeric_id!(
    /// Transaction identifier: the low 8 bytes of `sha256(tx.bytes())`.
    TxId
);

/// Serde helper for `u128` values (cumulative difficulty).
///
/// JSON carries them as decimal strings, binary formats as native `u128`.
pub(crate) mod u128_string {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(value)
        } else {
            serializer.serialize_u128(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(D::Error::custom)
        } else {
            u128::deserialize(deserializer)
        }
    }
}

/// Little-endian byte writer shared by the block and transaction layouts.
#[derive(Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u128(&mut self, v: u128) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Writes a `u32` length prefix followed by all of the bytes.
    ///
    /// Decoded keys and signatures are bounded by [`MAX_KEY_FIELD_BYTES`]
    /// and text fields by the structural checks, far below `u32::MAX`.
    pub fn prefixed(&mut self, bytes: &[u8]) -> &mut Self {
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
