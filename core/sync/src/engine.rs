//! Sync orchestration: detect, then transfer and verify each file.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mirrorsync_common::{Error, RemotePath, Result, Timestamp};
use mirrorsync_storage::{Connect, RemoteFs};

use crate::config::SyncConfig;
use crate::detector::{detect, detect_and_commit, Detection, FileChangeSet};
use crate::report::{SyncReport, TransferResult, TransferStatus};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::transfer::transfer;
use crate::verify::{verify, Verification};
use crate::watermark::WatermarkStore;

/// Detail recorded for files skipped by cancellation.
pub const CANCELLED_DETAIL: &str = "cancelled";

/// Mirrors new files from a source endpoint to a target endpoint.
///
/// Every file unit opens its own pair of connections, so units never share
/// a session and one failing file cannot disturb the others.
pub struct SyncEngine {
    source: Arc<dyn Connect>,
    target: Arc<dyn Connect>,
    store: Arc<dyn WatermarkStore>,
    retry: RetryExecutor,
    config: SyncConfig,
}

impl SyncEngine {
    /// Create a new sync engine.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if the configuration does not validate
    pub fn new(
        source: Arc<dyn Connect>,
        target: Arc<dyn Connect>,
        store: Arc<dyn WatermarkStore>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            target,
            store,
            retry: RetryExecutor::new(RetryConfig::new(config.connect_retries)),
            config,
        })
    }

    /// Replace the connection retry policy.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = RetryExecutor::new(config);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Watermark currently stored under the configured key.
    pub async fn current_watermark(&self) -> Result<Timestamp> {
        self.store.get(&self.config.watermark_key).await
    }

    /// List files modified after `watermark` without touching the store.
    pub async fn detect_changes(&self, watermark: Timestamp) -> Result<FileChangeSet> {
        let source = self.connect(self.source.as_ref(), "source").await?;
        Ok(detect(source.as_ref(), &self.config.root, watermark)
            .await?
            .changes)
    }

    /// Detect against the stored watermark and persist the advanced one.
    ///
    /// Returns the change set and the watermark that was written.
    pub async fn detect_changes_from_store(&self) -> Result<(FileChangeSet, Timestamp)> {
        let detection = self.detect_and_commit().await?;
        Ok((detection.changes, detection.watermark))
    }

    async fn detect_and_commit(&self) -> Result<Detection> {
        let source = self.connect(self.source.as_ref(), "source").await?;
        detect_and_commit(
            source.as_ref(),
            &self.config.root,
            self.store.as_ref(),
            &self.config.watermark_key,
        )
        .await
    }

    /// Transfer and verify a single file.
    ///
    /// Never fails: every error becomes a [`TransferStatus::TransferFailed`]
    /// result. Both connections are dropped before this returns.
    pub async fn sync_one(&self, path: &RemotePath) -> TransferResult {
        let start = Instant::now();
        match self.transfer_and_verify(path).await {
            Ok((bytes, verification)) => {
                let status = TransferStatus::from(&verification);
                let detail = match verification.into_result(path) {
                    Ok(_) => None,
                    Err(e) => {
                        warn!("{}", e);
                        Some(e.to_string())
                    }
                };
                TransferResult {
                    path: path.clone(),
                    status,
                    detail,
                    bytes,
                    elapsed: start.elapsed(),
                }
            }
            Err(e) => {
                error!("Failed to sync {}: {}", path, e);
                TransferResult::failed(path.clone(), e.to_string(), start.elapsed())
            }
        }
    }

    async fn transfer_and_verify(&self, path: &RemotePath) -> Result<(u64, Verification)> {
        let failed = |e: Error| Error::TransferFailed {
            path: path.to_string(),
            reason: e.to_string(),
        };
        let source = self
            .connect(self.source.as_ref(), "source")
            .await
            .map_err(failed)?;
        let target = self
            .connect(self.target.as_ref(), "target")
            .await
            .map_err(failed)?;

        let bytes = transfer(
            source.as_ref(),
            target.as_ref(),
            path,
            self.config.chunk_size,
        )
        .await?;
        let verification = verify(
            source.as_ref(),
            target.as_ref(),
            path,
            self.config.digest_algorithm,
        )
        .await?;
        Ok((bytes, verification))
    }

    /// Re-drive specific files outside the watermark mechanism.
    ///
    /// Meant for paths from [`SyncReport::failed_paths`].
    pub async fn sync_paths(&self, paths: &[RemotePath]) -> Vec<TransferResult> {
        info!("Syncing {} specific paths", paths.len());
        let (results, _) = self
            .sync_all(paths, &CancellationToken::new())
            .await;
        results
    }

    /// Run one full cycle: detect, persist the watermark, sync every file.
    ///
    /// # Errors
    /// Only detection and watermark-store failures abort the run. Per-file
    /// failures are reported in the returned [`SyncReport`].
    pub async fn run(&self) -> Result<SyncReport> {
        self.run_until_cancelled(&CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), but stops transferring once `token` fires.
    ///
    /// Detection always completes. In-flight files are dropped, which releases
    /// their handles and connections; they and any files not yet started are
    /// reported as failed with detail `"cancelled"`. The watermark is not
    /// rolled back.
    pub async fn run_until_cancelled(&self, token: &CancellationToken) -> Result<SyncReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        info!("Starting sync of {}", self.config.root);

        let detection = self.detect_and_commit().await?;
        let (results, cancelled) = self.sync_all(&detection.changes, token).await;

        let report = SyncReport {
            started_at,
            previous_watermark: detection.previous_watermark,
            watermark: detection.watermark,
            results,
            duration: start.elapsed(),
            cancelled,
        };

        let failed = report.failed_paths().len();
        info!(
            "Sync completed in {:?}: {} synced, {} failed{}",
            report.duration,
            report.results.len() - failed,
            failed,
            if cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Sync `paths` with bounded concurrency, keeping results in input order.
    async fn sync_all(
        &self,
        paths: &[RemotePath],
        token: &CancellationToken,
    ) -> (Vec<TransferResult>, bool) {
        let mut slots: Vec<Option<TransferResult>> = vec![None; paths.len()];

        let mut pending = pin!(stream::iter(paths.iter().enumerate())
            .map(|(index, path)| async move { (index, self.sync_one(path).await) })
            .buffer_unordered(self.config.max_concurrency));

        let cancelled = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break true,
                next = pending.next() => match next {
                    Some((index, result)) => {
                        debug!("Finished {} ({})", result.path, result.status.as_str());
                        slots[index] = Some(result);
                    }
                    None => break false,
                },
            }
        };

        if cancelled {
            warn!("Sync cancelled, dropping in-flight transfers");
        }

        let results = slots
            .into_iter()
            .zip(paths)
            .map(|(slot, path)| {
                slot.unwrap_or_else(|| {
                    TransferResult::failed(path.clone(), CANCELLED_DETAIL, Duration::ZERO)
                })
            })
            .collect();
        (results, cancelled)
    }

    async fn connect(&self, endpoint: &dyn Connect, side: &str) -> Result<Arc<dyn RemoteFs>> {
        let client = self.retry.execute(move || endpoint.connect()).await?;
        debug!("Connected to {} ({})", side, client.name());
        Ok(client)
    }
}
