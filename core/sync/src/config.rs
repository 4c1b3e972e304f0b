//! Sync engine configuration.

use serde::{Deserialize, Serialize};

use mirrorsync_common::{Error, RemotePath, Result};
use mirrorsync_storage::DigestAlgorithm;

use crate::transfer::DEFAULT_CHUNK_SIZE;

/// Watermark key used when none is configured.
pub const DEFAULT_WATERMARK_KEY: &str = "SOURCE_SFTP_LAST_RUNTIME";

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Source directory to mirror; detection starts here.
    pub root: RemotePath,
    /// Key under which the watermark is stored.
    pub watermark_key: String,
    /// Bytes moved per read/write cycle.
    pub chunk_size: usize,
    /// Maximum number of files transferred concurrently.
    pub max_concurrency: usize,
    /// Digest requested from both sides during verification.
    pub digest_algorithm: DigestAlgorithm,
    /// Maximum retries when acquiring a connection.
    pub connect_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: RemotePath::root(),
            watermark_key: DEFAULT_WATERMARK_KEY.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: 4,
            digest_algorithm: DigestAlgorithm::default(),
            connect_retries: 3,
        }
    }
}

impl SyncConfig {
    /// Check that the configuration can drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidInput("chunk_size must be positive".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(Error::InvalidInput(
                "max_concurrency must be positive".to_string(),
            ));
        }
        if self.watermark_key.trim().is_empty() {
            return Err(Error::InvalidInput("watermark_key must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert!(config.root.is_root());
        assert_eq!(config.watermark_key, "SOURCE_SFTP_LAST_RUNTIME");
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Sha256);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: SyncConfig = serde_json::from_str(
            r#"{ "root": "/home/user/outbox", "max_concurrency": 8, "digest_algorithm": "blake2b-256" }"#,
        )
        .unwrap();

        assert_eq!(config.root.to_string(), "/home/user/outbox");
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Blake2b256);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = SyncConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            watermark_key: " ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_parent_segments_in_root() {
        let result: std::result::Result<SyncConfig, _> =
            serde_json::from_str(r#"{ "root": "/a/../b" }"#);
        assert!(result.is_err());
    }
}
