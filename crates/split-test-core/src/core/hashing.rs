// crates/split-test-core/src/core/hashing.rs
// ============================================================================
// Module: Split Test Hashing
// Description: Canonical JSON digests and visitor bucketing hashes.
// Purpose: Provide stable hashes for stored definitions and allocation.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Two consumers share this module. Store backends hash canonical JSON
//! (RFC 8785) of experiment definitions and verify it on load. The allocator
//! derives a visitor bucket from SHA-256 so assignments are reproducible
//! across processes and releases.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing.
    Sha256,
}

impl HashAlgorithm {
    /// Returns the stable storage label for the algorithm.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Parses a stored algorithm label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

/// Default hash algorithm.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Deterministic content hash representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let digest = Sha256::digest(bytes);
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

/// Maps `(scope, key)` onto `[0, buckets)` using the leading SHA-256 bytes.
///
/// A zero separator byte keeps `("ab", "c")` and `("a", "bc")` distinct.
/// Returns 0 when `buckets` is 0.
#[must_use]
pub fn stable_bucket(scope: &str, key: &str, buckets: u64) -> u64 {
    if buckets == 0 {
        return 0;
    }
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([0_u8]);
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest[.. 8]);
    u64::from_be_bytes(prefix) % buckets
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test fixtures use unwraps for clarity.")]

    use super::*;

    #[test]
    fn stable_bucket_is_bounded() {
        for key in ["a", "visitor-1", "", "ünïcode"] {
            assert!(stable_bucket("test", key, 100) < 100);
        }
        assert_eq!(stable_bucket("test", "anything", 0), 0);
    }

    #[test]
    fn stable_bucket_separates_scope_and_key() {
        let left = stable_bucket("ab", "c", u64::MAX);
        let right = stable_bucket("a", "bc", u64::MAX);
        assert_ne!(left, right);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": 2});
        let bytes = canonical_json_bytes(&value).unwrap();
        assert_eq!(bytes, br#"{"a":2,"b":1}"#);
    }

    #[test]
    fn sha256_digest_matches_known_vector() {
        let digest = hash_bytes(HashAlgorithm::Sha256, b"abc");
        assert_eq!(
            digest.value,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
