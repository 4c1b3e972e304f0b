//! mirrorsync sync engine
//!
//! This module mirrors new files from a source endpoint to a target endpoint:
//! - Watermark-based change detection with a breadth-first walk
//! - Directory structure replication on the target
//! - Chunked streaming transfer
//! - Digest verification with a size-comparison fallback
//! - Bounded-concurrency orchestration with cancellation

pub mod config;
pub mod detector;
pub mod engine;
pub mod replicator;
pub mod report;
pub mod retry;
pub mod transfer;
pub mod verify;
pub mod watermark;

// Re-export main types
pub use config::{SyncConfig, DEFAULT_WATERMARK_KEY};
pub use detector::{detect, detect_and_commit, Detection, FileChangeSet};
pub use engine::{SyncEngine, CANCELLED_DETAIL};
pub use replicator::ensure_directory;
pub use report::{SyncReport, TransferResult, TransferStatus};
pub use retry::{RetryConfig, RetryExecutor};
pub use transfer::{transfer, DEFAULT_CHUNK_SIZE};
pub use verify::{compare_sizes, probe_digests, verify, DigestProbe, Verification};
pub use watermark::{JsonFileWatermarkStore, MemoryWatermarkStore, WatermarkStore};
pub use tokio_util::sync::CancellationToken;
