//! SHA-256 content addressing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A fixed-width SHA-256 content hash.
///
/// `Hash::from_bytes` hashes its input; use [`Hash::from_raw`] when the 32
/// digest bytes are already in hand (decoding, test fixtures).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Number of bytes in a hash.
    pub const SIZE: usize = 32;

    /// The all-zero hash, used as the "empty" sentinel.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes with SHA-256.
    pub fn from_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }

    /// Hash the concatenation of several byte slices.
    pub fn from_slices(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Hash(out)
    }

    /// Wrap raw digest bytes without hashing.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// The digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the empty sentinel.
    pub fn is_empty(&self) -> bool {
        *self == Hash::ZERO
    }

    /// Hex representation of the full digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The leading 8 bytes are enough to tell hashes apart in logs.
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}
