//! SHA-256 integrity stamps for uploaded payloads.
//!
//! The digest is computed incrementally while the payload is read so the
//! recorded checksum always covers exactly the bytes that get stored.

use sha2::{Digest, Sha256};

/// Incremental SHA-256 over a payload, tracking its byte length alongside.
#[derive(Clone, Default)]
pub struct ChecksumHasher {
    hasher: Sha256,
    len: u64,
}

impl ChecksumHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of the payload.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Finish hashing and return the lowercase hex digest with the byte count.
    pub fn finalize(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.len)
    }
}

/// One-shot lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// True when `bytes` hash to `expected` (case-insensitive hex compare).
pub fn verify(bytes: &[u8], expected: &str) -> bool {
    sha256_hex(bytes).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn one_shot_matches_known_vector() {
        assert_eq!(sha256_hex(b"abc"), ABC_SHA256);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut hasher = ChecksumHasher::new();
        hasher.update(b"a");
        hasher.update(b"");
        hasher.update(b"bc");
        let (digest, len) = hasher.finalize();
        assert_eq!(digest, ABC_SHA256);
        assert_eq!(len, 3);
    }

    #[test]
    fn verify_detects_tampering() {
        assert!(verify(b"abc", ABC_SHA256));
        assert!(verify(b"abc", &ABC_SHA256.to_uppercase()));
        assert!(!verify(b"abd", ABC_SHA256));
    }
}
