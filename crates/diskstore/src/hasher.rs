//! Key hashing
//!
//! Keys are rendered with `Display`, digested, and turned into a lowercase
//! hex token that is safe to use as a file name.

use std::fmt;

use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Digest used to derive file tokens from keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// SHA-1 (160 bit), the default
    #[default]
    Sha1,
    /// SHA-256, the secondary algorithm
    Sha256,
}

impl DigestAlgorithm {
    /// Name as accepted on the command line
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deterministic key -> token mapping
///
/// A fresh digest is built for every call, so one hasher can be shared
/// between threads without a lock. Distinct keys that collide share a file;
/// the last writer wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyHasher {
    algorithm: DigestAlgorithm,
}

impl KeyHasher {
    /// Create a hasher for the given algorithm
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Algorithm in use
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Hash a key into its token
    pub fn hash<K: fmt::Display + ?Sized>(&self, key: &K) -> String {
        let canonical = key.to_string();
        let digest = match self.algorithm {
            DigestAlgorithm::Sha1 => Sha1::digest(canonical.as_bytes()).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(canonical.as_bytes()).to_vec(),
        };
        render_token(&digest)
    }
}

/// Hex-encode as an unsigned big integer: no leading zeros, even length.
fn render_token(digest: &[u8]) -> String {
    let encoded = hex::encode(digest);
    let trimmed = encoded.trim_start_matches('0');
    if trimmed.is_empty() {
        return "00".to_string();
    }
    if trimmed.len() % 2 != 0 {
        format!("0{}", trimmed)
    } else {
        trimmed.to_string()
    }
}
