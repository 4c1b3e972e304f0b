//! Content digest algorithms.

use blake2::digest::consts::U32;
use blake2::Blake2b;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use mirrorsync_common::Error;

/// Algorithm identifier used for remote digest requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// SHA-256.
    #[default]
    #[serde(rename = "sha256")]
    Sha256,
    /// BLAKE2b with a 256-bit output.
    #[serde(rename = "blake2b-256")]
    Blake2b256,
}

impl DigestAlgorithm {
    /// Wire identifier of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Blake2b256 => "blake2b-256",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "blake2b-256" | "blake2b" => Ok(DigestAlgorithm::Blake2b256),
            other => Err(Error::InvalidInput(format!(
                "Unknown digest algorithm: {}",
                other
            ))),
        }
    }
}

/// Incremental hasher for one of the supported algorithms.
pub enum ContentHasher {
    Sha256(Sha256),
    Blake2b256(Blake2b<U32>),
}

impl ContentHasher {
    /// Create a hasher for `algorithm`.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => ContentHasher::Sha256(Sha256::new()),
            DigestAlgorithm::Blake2b256 => ContentHasher::Blake2b256(Blake2b::<U32>::new()),
        }
    }

    /// Feed more content.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Sha256(h) => h.update(data),
            ContentHasher::Blake2b256(h) => h.update(data),
        }
    }

    /// Finish and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            ContentHasher::Sha256(h) => hex::encode(h.finalize()),
            ContentHasher::Blake2b256(h) => hex::encode(h.finalize()),
        }
    }

    /// One-shot digest of a byte slice.
    pub fn digest_hex(algorithm: DigestAlgorithm, data: &[u8]) -> String {
        let mut hasher = Self::new(algorithm);
        hasher.update(data);
        hasher.finalize_hex()
    }
}
