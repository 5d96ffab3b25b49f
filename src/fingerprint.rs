//! Content fingerprints for cheap change detection
//!
//! A fingerprint is the lowercase hex SHA-256 of a document's text. Two
//! documents with equal fingerprints are treated as identical content, so the
//! catalog only compares digests instead of full file bodies.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded fingerprint
pub const FINGERPRINT_LEN: usize = 64;

/// Computes the fingerprint of `content`
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns true when `content` hashes to `stored`
pub fn matches(content: &str, stored: &str) -> bool {
    fingerprint(content).eq_ignore_ascii_case(stored)
}
