//! Directory structure replication on the target.

use tracing::debug;

use mirrorsync_common::{Error, RemotePath, Result};
use mirrorsync_storage::RemoteFs;

/// Make sure `path` exists on `client` as a directory, creating missing
/// ancestors from the root down.
///
/// Calling this on an existing tree performs only status queries.
///
/// # Preconditions
/// - `path` is the parent directory of a file, not the file path itself
///
/// # Postconditions
/// - Every prefix of `path` exists on `client` as a directory
/// - A prefix created concurrently by another unit is accepted
///
/// # Errors
/// - `Error::DirectoryConflict` if a non-directory occupies one of the
///   prefixes; nothing below it is created
pub async fn ensure_directory(client: &dyn RemoteFs, path: &RemotePath) -> Result<()> {
    for prefix in path.prefixes() {
        match client.stat(&prefix).await {
            Ok(stat) if stat.is_directory => {}
            Ok(_) => {
                return Err(Error::DirectoryConflict {
                    path: prefix.to_string(),
                });
            }
            Err(e) if e.is_not_found() => create_directory(client, &prefix).await?,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn create_directory(client: &dyn RemoteFs, path: &RemotePath) -> Result<()> {
    match client.mkdir(path).await {
        Ok(()) => {
            debug!("Created directory: {}", path);
            Ok(())
        }
        // Another file unit created it between our stat and mkdir.
        Err(e) if e.is_already_exists() => {
            if client.stat(path).await?.is_directory {
                Ok(())
            } else {
                Err(Error::DirectoryConflict {
                    path: path.to_string(),
                })
            }
        }
        Err(e) => Err(e),
    }
}
