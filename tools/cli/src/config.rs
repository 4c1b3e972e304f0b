//! Config file loading and command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use mirrorsync_common::RemotePath;
use mirrorsync_sync::SyncConfig;

/// One remote endpoint: a registered provider name plus its settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub provider: String,
    #[serde(default)]
    pub config: Value,
}

impl EndpointConfig {
    /// Local directory endpoint.
    pub fn local(root: &Path) -> Self {
        Self {
            provider: "local".to_string(),
            config: json!({ "root": root.to_string_lossy() }),
        }
    }
}

/// Contents of the JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub source: Option<EndpointConfig>,
    pub target: Option<EndpointConfig>,
    /// Where watermarks are persisted.
    pub state_file: Option<PathBuf>,
    pub sync: SyncConfig,
}

impl FileConfig {
    /// Read a config file. Relative `state_file` paths resolve against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: FileConfig = serde_json::from_str(&json)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        if let (Some(state), Some(dir)) = (&config.state_file, path.parent()) {
            if state.is_relative() {
                config.state_file = Some(dir.join(state));
            }
        }
        Ok(config)
    }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub source: EndpointConfig,
    pub target: Option<EndpointConfig>,
    pub state_file: PathBuf,
    pub sync: SyncConfig,
}

/// Values given on the command line; each one overrides the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source_dir: Option<PathBuf>,
    pub target_dir: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
    pub root: Option<String>,
    pub chunk_size: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub digest: Option<String>,
    pub watermark_key: Option<String>,
}

pub const DEFAULT_STATE_FILE: &str = "mirrorsync-state.json";

impl Settings {
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self> {
        let mut sync = file.sync;
        if let Some(root) = overrides.root {
            sync.root = RemotePath::parse(&root).context("Invalid --root path")?;
        }
        if let Some(chunk_size) = overrides.chunk_size {
            sync.chunk_size = chunk_size;
        }
        if let Some(max_concurrency) = overrides.max_concurrency {
            sync.max_concurrency = max_concurrency;
        }
        if let Some(digest) = overrides.digest {
            sync.digest_algorithm = digest.parse().context("Invalid --digest")?;
        }
        if let Some(key) = overrides.watermark_key {
            sync.watermark_key = key;
        }
        sync.validate().context("Invalid sync settings")?;

        let source = overrides
            .source_dir
            .as_deref()
            .map(EndpointConfig::local)
            .or(file.source)
            .context("No source configured (use --source-dir or a config file)")?;
        let target = overrides
            .target_dir
            .as_deref()
            .map(EndpointConfig::local)
            .or(file.target);
        let state_file = overrides
            .state_file
            .or(file.state_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));

        Ok(Self {
            source,
            target,
            state_file,
            sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "source": { "provider": "local", "config": { "root": "/srv/outbox" } },
        "target": { "provider": "local" },
        "state_file": "state/watermarks.json",
        "sync": { "root": "/daily", "max_concurrency": 2 }
    }"#;

    #[test]
    fn test_load_resolves_state_file_relative_to_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mirrorsync.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(
            config.state_file.unwrap(),
            temp.path().join("state/watermarks.json")
        );
        assert_eq!(config.target.unwrap().config, Value::Null);
        assert_eq!(config.sync.max_concurrency, 2);
        assert_eq!(config.sync.watermark_key, "SOURCE_SFTP_LAST_RUNTIME");
    }

    #[test]
    fn test_overrides_win() {
        let file: FileConfig = serde_json::from_str(SAMPLE).unwrap();
        let overrides = Overrides {
            source_dir: Some(PathBuf::from("/tmp/in")),
            max_concurrency: Some(8),
            digest: Some("blake2b-256".to_string()),
            ..Default::default()
        };

        let settings = Settings::resolve(file, overrides).unwrap();
        assert_eq!(settings.source.config["root"], "/tmp/in");
        assert_eq!(settings.target.unwrap().provider, "local");
        assert_eq!(settings.sync.max_concurrency, 8);
        assert_eq!(settings.sync.root.to_string(), "/daily");
    }

    #[test]
    fn test_missing_source_is_an_error() {
        assert!(Settings::resolve(FileConfig::default(), Overrides::default()).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let overrides = Overrides {
            source_dir: Some(PathBuf::from("/tmp/in")),
            max_concurrency: Some(0),
            ..Default::default()
        };
        assert!(Settings::resolve(FileConfig::default(), overrides).is_err());
    }
}
