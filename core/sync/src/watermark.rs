//! Watermark persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use mirrorsync_common::{Error, Result, Timestamp};

/// Key/value store holding the last-synchronized timestamp per key.
///
/// Unknown keys read as 0. Stores refuse to move a watermark backwards.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Read the watermark for `key`.
    async fn get(&self, key: &str) -> Result<Timestamp>;

    /// Store the watermark for `key`.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if `value` is lower than the stored watermark
    async fn set(&self, key: &str, value: Timestamp) -> Result<()>;
}

fn check_monotonic(key: &str, current: Timestamp, value: Timestamp) -> Result<()> {
    if value < current {
        return Err(Error::InvalidInput(format!(
            "Refusing to move watermark '{}' back from {} to {}",
            key, current, value
        )));
    }
    Ok(())
}

/// Process-local watermark store.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    values: RwLock<HashMap<String, Timestamp>>,
}

impl MemoryWatermarkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, key: &str) -> Result<Timestamp> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).copied().unwrap_or(0))
    }

    async fn set(&self, key: &str, value: Timestamp) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        check_monotonic(key, values.get(key).copied().unwrap_or(0), value)?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// On-disk layout of [`JsonFileWatermarkStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct WatermarkFile {
    watermarks: BTreeMap<String, Timestamp>,
    updated_at: Option<DateTime<Utc>>,
}

/// Watermark store backed by a JSON file.
///
/// Writes go to a temporary sibling file which is then renamed over the
/// original, so a crash never leaves a torn file behind.
pub struct JsonFileWatermarkStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileWatermarkStore {
    /// Create a store at `path`. The file is created on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored watermarks.
    pub async fn entries(&self) -> Result<BTreeMap<String, Timestamp>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.watermarks)
    }

    /// Overwrite a watermark without the monotonic check.
    ///
    /// Meant for operators re-driving a range of files on purpose.
    pub async fn force_set(&self, key: &str, value: Timestamp) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        file.watermarks.insert(key.to_string(), value);
        self.save(file).await
    }

    async fn load(&self) -> Result<WatermarkFile> {
        match fs::read_to_string(&self.path).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(WatermarkFile::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn save(&self, mut file: WatermarkFile) -> Result<()> {
        file.updated_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, json).await?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Io(e));
        }

        debug!("Saved watermarks to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for JsonFileWatermarkStore {
    async fn get(&self, key: &str) -> Result<Timestamp> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.watermarks.get(key).copied().unwrap_or(0))
    }

    async fn set(&self, key: &str, value: Timestamp) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        check_monotonic(key, file.watermarks.get(key).copied().unwrap_or(0), value)?;
        file.watermarks.insert(key.to_string(), value);
        self.save(file).await
    }
}
