//! Per-file results and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use mirrorsync_common::{RemotePath, Result, Timestamp};

use crate::verify::Verification;

/// Final status of one file unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Content digests matched.
    Verified,
    /// Digests unavailable, sizes matched.
    SizeMatchedOnly,
    /// Transfer completed but source and target disagree.
    Mismatch,
    /// The file could not be transferred.
    TransferFailed,
}

impl TransferStatus {
    /// Whether the file counts as synced.
    pub fn is_success(&self) -> bool {
        matches!(self, TransferStatus::Verified | TransferStatus::SizeMatchedOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Verified => "verified",
            TransferStatus::SizeMatchedOnly => "size_matched_only",
            TransferStatus::Mismatch => "mismatch",
            TransferStatus::TransferFailed => "transfer_failed",
        }
    }
}

impl From<&Verification> for TransferStatus {
    fn from(verification: &Verification) -> Self {
        match verification {
            Verification::Verified => TransferStatus::Verified,
            Verification::SizeMatchedOnly => TransferStatus::SizeMatchedOnly,
            Verification::Mismatch { .. } => TransferStatus::Mismatch,
        }
    }
}

/// Outcome of one file unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub path: RemotePath,
    pub status: TransferStatus,
    /// Failure or mismatch reason.
    pub detail: Option<String>,
    /// Bytes written to the target.
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferResult {
    pub fn failed(path: RemotePath, detail: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            path,
            status: TransferStatus::TransferFailed,
            detail: Some(detail.into()),
            bytes: 0,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Summary of one sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    /// Watermark before detection.
    pub previous_watermark: Timestamp,
    /// Watermark persisted by detection.
    pub watermark: Timestamp,
    /// One result per detected file, in change-set order.
    pub results: Vec<TransferResult>,
    pub duration: Duration,
    /// Whether the run was cancelled before every file finished.
    pub cancelled: bool,
}

impl SyncReport {
    /// Number of results per status.
    pub fn count_by_status(&self) -> BTreeMap<TransferStatus, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            *counts.entry(result.status).or_insert(0) += 1;
        }
        counts
    }

    /// Count of results with the given status.
    pub fn count(&self, status: TransferStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Paths that were detected but not successfully synced.
    ///
    /// The watermark has already moved past these files, so they will not be
    /// picked up by the next run.
    pub fn failed_paths(&self) -> Vec<RemotePath> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.path.clone())
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(TransferResult::is_success)
    }

    /// Total bytes written to the target.
    pub fn bytes_transferred(&self) -> u64 {
        self.results.iter().map(|r| r.bytes).sum()
    }

    /// Serialize the report for machine consumption.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
