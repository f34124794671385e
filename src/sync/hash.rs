//! Hashing utilities for sync operations.
//!
//! Content equality across transports is decided by BLAKE3 digests only;
//! timestamps are carried along but never trusted for equality.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one version of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Blob size in bytes.
    pub size_bytes: u64,
    /// BLAKE3 digest as hex string.
    pub content_hash: String,
    /// Modification time; absent when the remote cannot report it.
    pub modified_at: Option<DateTime<Utc>>,
}

impl Fingerprint {
    /// Fingerprint a blob.
    pub fn compute(data: &[u8], modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            size_bytes: data.len() as u64,
            content_hash: hash_bytes(data),
            modified_at,
        }
    }

    /// Check if two fingerprints describe the same content.
    pub fn same_content(&self, other: &Fingerprint) -> bool {
        self.content_hash == other.content_hash
    }

    /// Short form of the hash for logs.
    pub fn short_hash(&self) -> &str {
        self.content_hash.get(..12).unwrap_or(&self.content_hash)
    }
}

/// Hash bytes using BLAKE3.
pub fn hash_bytes(data: &[u8]) -> String {
    // Use parallel hashing for data > 128KB
    if data.len() > 128 * 1024 {
        let mut hasher = blake3::Hasher::new();
        hasher.update_rayon(data);
        hasher.finalize().to_hex().to_string()
    } else {
        blake3::hash(data).to_hex().to_string()
    }
}
