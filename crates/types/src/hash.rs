//! Content-addressed 32-byte digest.

use sbor::prelude::*;
use std::fmt;

/// A 32-byte blake3 digest.
///
/// Used for block identifiers and payload commitments. Construct with
/// [`Hash::digest`] to hash arbitrary bytes, or [`Hash::from_raw`] when the
/// bytes already are a digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash, used as the genesis block identifier.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes into a digest.
    pub fn digest(bytes: &[u8]) -> Self {
        Hash(*blake3::hash(bytes).as_bytes())
    }

    /// Wrap raw digest bytes without hashing.
    pub fn from_raw(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Get the digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a digest from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let bytes = hex::decode(s).map_err(|_| HexError::InvalidHex)?;
        let raw: [u8; 32] = bytes.try_into().map_err(|_| HexError::InvalidLength)?;
        Ok(Hash(raw))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        write!(f, "Hash({}..{})", &hex[..8], &hex[hex.len() - 8..])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Errors parsing a hash from hex.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    /// The string is not valid hexadecimal.
    #[error("invalid hex string")]
    InvalidHex,
    /// The decoded bytes are not exactly 32 bytes.
    #[error("expected 32 bytes")]
    InvalidLength,
}
