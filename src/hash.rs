// src/hash.rs

//! SHA-256 content hashing
//!
//! Checksums serve two purposes in the engine: the analyzer short-circuits
//! file operations whose declared `checksum` matches the bytes on disk, and
//! the journal stamps every snapshot so a persisted log can be verified
//! after the fact. Checksums are always computed over the full bytes, even
//! when snapshot content is truncated.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of `bytes` as lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Check `bytes` against a hex-encoded SHA-256 checksum, case-insensitively
pub fn matches_checksum(bytes: &[u8], checksum: &str) -> bool {
    sha256_hex(bytes) == checksum.to_ascii_lowercase()
}
