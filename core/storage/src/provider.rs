//! Remote filesystem capability traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use mirrorsync_common::{RemotePath, Result, Timestamp};

use crate::digest::DigestAlgorithm;

/// Status of a single remote path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Whether this is a directory.
    pub is_directory: bool,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
    /// Last modification time.
    pub modified: Timestamp,
}

/// One directory listing result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Absolute path of the entry.
    pub path: RemotePath,
    /// Whether this is a directory.
    pub is_directory: bool,
    /// Last modification time.
    pub modified: Timestamp,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
}

impl RemoteEntry {
    /// Entry name (last path component).
    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("/")
    }
}

/// Answer to a digest request.
///
/// `Unsupported` is a regular reply, not an error: it tells the caller to use
/// a weaker verification strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestReply {
    /// Lowercase hex digest of the file content.
    Digest(String),
    /// The remote end cannot compute digests with this algorithm.
    Unsupported,
}

/// Readable handle to a remote file.
///
/// Dropping the handle releases it.
#[async_trait]
pub trait RemoteReader: Send {
    /// Read up to `max_len` bytes.
    ///
    /// Returns fewer bytes only at end of file; an empty vector means the
    /// stream is exhausted.
    async fn read_chunk(&mut self, max_len: usize) -> Result<Vec<u8>>;
}

/// Writable handle to a remote file.
///
/// Dropping the handle releases it without flushing.
#[async_trait]
pub trait RemoteWriter: Send {
    /// Append a chunk to the file.
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// Flush buffered data. Call once after the last chunk.
    async fn finish(&mut self) -> Result<()>;
}

/// Remote filesystem client consumed by the sync engine.
///
/// Implementations handle their own transport and authentication.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Get the provider name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Get status for a path.
    ///
    /// # Postconditions
    /// - `size` is `Some` for files and `None` for directories
    ///
    /// # Errors
    /// - `Error::NotFound` if nothing exists at the path
    async fn stat(&self, path: &RemotePath) -> Result<FileStat>;

    /// List the direct children of a directory.
    ///
    /// # Preconditions
    /// - Path must be a directory
    ///
    /// # Postconditions
    /// - Every entry's path is `path` joined with one component
    /// - Order is unspecified
    ///
    /// # Errors
    /// - `Error::NotFound` if the directory does not exist
    async fn list_dir(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>>;

    /// Create a single directory.
    ///
    /// # Preconditions
    /// - Parent directory must exist
    ///
    /// # Postconditions
    /// - A directory exists at the path
    ///
    /// # Errors
    /// - `Error::AlreadyExists` if the path exists
    /// - `Error::NotFound` if the parent is missing
    async fn mkdir(&self, path: &RemotePath) -> Result<()>;

    /// Open a file for reading.
    ///
    /// # Preconditions
    /// - A regular file must exist at path
    ///
    /// # Postconditions
    /// - Reads start at offset 0
    async fn open_read(&self, path: &RemotePath) -> Result<Box<dyn RemoteReader>>;

    /// Open a file for writing, creating or truncating it.
    ///
    /// # Preconditions
    /// - Parent directory must exist
    ///
    /// # Postconditions
    /// - An empty file exists at path; chunks are appended in order
    async fn open_write(&self, path: &RemotePath) -> Result<Box<dyn RemoteWriter>>;

    /// Compute a content digest on the remote side.
    ///
    /// The default reports the capability as unsupported.
    async fn digest(&self, path: &RemotePath, algorithm: DigestAlgorithm) -> Result<DigestReply> {
        let _ = (path, algorithm);
        Ok(DigestReply::Unsupported)
    }
}

/// Source of fresh connections to one remote endpoint.
///
/// Every file unit of a sync run acquires its own connection and drops it on
/// completion.
#[async_trait]
pub trait Connect: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>>;
}
