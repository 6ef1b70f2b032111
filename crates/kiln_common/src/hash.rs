//! Hashing for asset lookup and stored-artifact integrity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 64-bit hash identifying a logical asset.
///
/// Built from an asset's initializer strings with XXH3-64 and folded with
/// [`AssetHash::combine`]. Collisions are not detected: two identifiers that
/// hash to the same value share a cache slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetHash(u64);

impl AssetHash {
    /// Hashes a single string.
    pub fn of_str(s: &str) -> Self {
        Self(xxhash_rust::xxh3::xxh3_64(s.as_bytes()))
    }

    /// Creates an `AssetHash` from a raw `u64`.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw `u64` value.
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Folds another 64-bit value into this hash.
    ///
    /// Order matters: `a.combine(b)` and `b.combine(a)` differ.
    #[must_use]
    pub fn combine(self, value: u64) -> Self {
        Self(xxhash_rust::xxh3::xxh3_64_with_seed(
            &value.to_le_bytes(),
            self.0,
        ))
    }

    /// Folds another asset hash into this hash.
    #[must_use]
    pub fn combine_hash(self, other: AssetHash) -> Self {
        self.combine(other.0)
    }
}

impl fmt::Display for AssetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::Debug for AssetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetHash({:016x})", self.0)
    }
}

/// A 128-bit content hash computed using XXH3.
///
/// Used as the integrity checksum of stored artifacts and to detect when a
/// source file an artifact was compiled from has changed on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}
