//! Chunked streaming of a single file.

use tracing::{debug, info};

use mirrorsync_common::{Error, RemotePath, Result};
use mirrorsync_storage::{RemoteFs, RemoteReader, RemoteWriter};

use crate::replicator::ensure_directory;

/// Default transfer chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Copy `path` from `source` to the same path on `target`.
///
/// The target's parent directory is created first. Both handles are dropped
/// on every exit path. A failure mid-stream leaves a truncated target file.
///
/// Returns the number of bytes written.
///
/// # Errors
/// - `Error::TransferFailed` for any failure, including a directory conflict
///   on the target
pub async fn transfer(
    source: &dyn RemoteFs,
    target: &dyn RemoteFs,
    path: &RemotePath,
    chunk_size: usize,
) -> Result<u64> {
    let failed = |e: Error| Error::TransferFailed {
        path: path.to_string(),
        reason: e.to_string(),
    };

    if chunk_size == 0 {
        return Err(failed(Error::InvalidInput(
            "Chunk size must be positive".to_string(),
        )));
    }

    if let Some(parent) = path.parent() {
        ensure_directory(target, &parent).await.map_err(failed)?;
    }

    let mut reader = source.open_read(path).await.map_err(failed)?;
    let mut writer = target.open_write(path).await.map_err(failed)?;

    let bytes = copy_chunks(reader.as_mut(), writer.as_mut(), chunk_size)
        .await
        .map_err(failed)?;
    writer.finish().await.map_err(failed)?;

    info!("Successfully synced {} ({} bytes)", path, bytes);
    Ok(bytes)
}

/// Pump chunks until the reader returns an empty chunk.
///
/// Holds at most one chunk at a time.
pub async fn copy_chunks(
    reader: &mut dyn RemoteReader,
    writer: &mut dyn RemoteWriter,
    chunk_size: usize,
) -> Result<u64> {
    let mut total = 0u64;
    loop {
        let chunk = reader.read_chunk(chunk_size).await?;
        if chunk.is_empty() {
            break;
        }
        writer.write_chunk(&chunk).await?;
        total += chunk.len() as u64;
        debug!(bytes = chunk.len(), total, "Wrote chunk");
    }
    Ok(total)
}
