//! Content digests stored on datasets and recomputed by the auditor.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// SHA-256 digest of a dataset file.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Digest an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Start an incremental digest for streamed content.
    pub fn hasher() -> ContentHasher {
        ContentHasher(Sha256::new())
    }

    /// Parse the lowercase or uppercase hex form stored in the catalog.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 || !s.is_ascii() {
            return Err(crate::Error::InvalidHash(format!(
                "expected 64 hex chars, got {:?}",
                s
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(pair)
                .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            bytes[i] =
                u8::from_str_radix(pair, 16).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Compare against a stored hex digest, ignoring case.
    pub fn matches_hex(&self, stored: &str) -> bool {
        self.to_hex().eq_ignore_ascii_case(stored.trim())
    }
}

impl FromStr for ContentHash {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental SHA-256 hasher.
pub struct ContentHasher(Sha256);

impl ContentHasher {
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> ContentHash {
        ContentHash(self.0.finalize().into())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        ContentHash::hasher()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_one_shot() {
        let mut hasher = ContentHash::hasher();
        hasher.update(b"spikes");
        hasher.update(b".times");
        assert_eq!(hasher.finalize(), ContentHash::compute(b"spikes.times"));
    }

    #[test]
    fn empty_input_has_known_digest() {
        assert_eq!(
            ContentHash::compute(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn matches_hex_ignores_case() {
        let hash = ContentHash::compute(b"hello");
        assert!(hash.matches_hex(&hash.to_hex().to_uppercase()));
        assert!(!hash.matches_hex("deadbeef"));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(ContentHash::from_hex("abc").is_err());
        assert!(ContentHash::from_hex(&"zz".repeat(32)).is_err());
    }
}
