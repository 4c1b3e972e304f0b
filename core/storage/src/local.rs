//! Local directory exposed as a remote filesystem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use mirrorsync_common::{Error, RemotePath, Result};

use crate::digest::{ContentHasher, DigestAlgorithm};
use crate::provider::{
    Connect, DigestReply, FileStat, RemoteEntry, RemoteFs, RemoteReader, RemoteWriter,
};

const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

/// Local filesystem provider.
///
/// Maps remote paths onto a root directory. Used by the CLI for
/// locally-mounted endpoints and in tests.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
    digest_support: bool,
}

impl LocalFs {
    /// Create a new local provider with the given root directory.
    ///
    /// # Errors
    /// - Root does not exist or is not a directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::NotFound(format!(
                "Root directory not found: {}",
                root.display()
            )));
        }

        Ok(Self {
            root,
            digest_support: true,
        })
    }

    /// Enable or disable the digest capability.
    pub fn with_digest_support(mut self, enabled: bool) -> Self {
        self.digest_support = enabled;
        self
    }

    /// Root directory on disk.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a RemotePath to a filesystem path.
    fn to_fs_path(&self, path: &RemotePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn create_stat(fs_meta: &std::fs::Metadata) -> FileStat {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        FileStat {
            is_directory: fs_meta.is_dir(),
            size: if fs_meta.is_dir() {
                None
            } else {
                Some(fs_meta.len())
            },
            modified: modified.timestamp(),
        }
    }

    fn map_io(err: std::io::Error, path: &RemotePath) -> Error {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("Path not found: {}", path)),
            std::io::ErrorKind::AlreadyExists => {
                Error::AlreadyExists(format!("Path already exists: {}", path))
            }
            _ => Error::Io(err),
        }
    }
}

#[async_trait]
impl RemoteFs for LocalFs {
    fn name(&self) -> &str {
        "local"
    }

    async fn stat(&self, path: &RemotePath) -> Result<FileStat> {
        let fs_meta = fs::metadata(self.to_fs_path(path))
            .await
            .map_err(|e| Self::map_io(e, path))?;
        Ok(Self::create_stat(&fs_meta))
    }

    async fn list_dir(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let fs_path = self.to_fs_path(path);
        let mut entries = fs::read_dir(&fs_path)
            .await
            .map_err(|e| Self::map_io(e, path))?;

        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                tracing::warn!("Skipping non UTF-8 entry in {}", fs_path.display());
                continue;
            };

            // Linked files are mirrored as content, linked directories never.
            let fs_meta = match fs::metadata(entry.path()).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!("Skipping dangling link {}", entry.path().display());
                    continue;
                }
                Err(e) => return Err(Error::Io(e)),
            };
            if fs_meta.is_dir() && entry.file_type().await?.is_symlink() {
                tracing::warn!("Skipping symlinked directory {}", entry.path().display());
                continue;
            }
            // FIFOs, sockets and device nodes would block or never end on read.
            if !fs_meta.is_file() && !fs_meta.is_dir() {
                tracing::warn!("Skipping special file {}", entry.path().display());
                continue;
            }
            let child = match path.join(&name) {
                Ok(child) => child,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            let stat = Self::create_stat(&fs_meta);
            results.push(RemoteEntry {
                path: child,
                is_directory: stat.is_directory,
                modified: stat.modified,
                size: stat.size,
            });
        }

        Ok(results)
    }

    async fn mkdir(&self, path: &RemotePath) -> Result<()> {
        fs::create_dir(self.to_fs_path(path))
            .await
            .map_err(|e| Self::map_io(e, path))
    }

    async fn open_read(&self, path: &RemotePath) -> Result<Box<dyn RemoteReader>> {
        let file = fs::File::open(self.to_fs_path(path))
            .await
            .map_err(|e| Self::map_io(e, path))?;
        Ok(Box::new(LocalReader { file }))
    }

    async fn open_write(&self, path: &RemotePath) -> Result<Box<dyn RemoteWriter>> {
        let file = fs::File::create(self.to_fs_path(path))
            .await
            .map_err(|e| Self::map_io(e, path))?;
        Ok(Box::new(LocalWriter { file }))
    }

    async fn digest(&self, path: &RemotePath, algorithm: DigestAlgorithm) -> Result<DigestReply> {
        if !self.digest_support {
            return Ok(DigestReply::Unsupported);
        }

        let mut file = fs::File::open(self.to_fs_path(path))
            .await
            .map_err(|e| Self::map_io(e, path))?;
        let mut hasher = ContentHasher::new(algorithm);
        let mut buffer = vec![0u8; DIGEST_BUFFER_SIZE];

        loop {
            let bytes_read = file.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(DigestReply::Digest(hasher.finalize_hex()))
    }
}

#[async_trait]
impl Connect for LocalFs {
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>> {
        if !fs::metadata(&self.root).await?.is_dir() {
            return Err(Error::Network(format!(
                "Root is no longer a directory: {}",
                self.root.display()
            )));
        }
        Ok(Arc::new(self.clone()))
    }
}

struct LocalReader {
    file: fs::File,
}

#[async_trait]
impl RemoteReader for LocalReader {
    async fn read_chunk(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut chunk = Vec::with_capacity(max_len);
        // Fill the whole chunk; only EOF may shorten it.
        (&mut self.file)
            .take(max_len as u64)
            .read_to_end(&mut chunk)
            .await?;
        Ok(chunk)
    }
}

struct LocalWriter {
    file: fs::File,
}

#[async_trait]
impl RemoteWriter for LocalWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn p(path: &str) -> RemotePath {
        RemotePath::parse(path).unwrap()
    }

    #[tokio::test]
    async fn test_local_write_read() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFs::new(temp.path()).unwrap();
        let data = b"Hello, Local!".to_vec();

        let mut writer = fs.open_write(&p("/test.txt")).await.unwrap();
        writer.write_chunk(&data).await.unwrap();
        writer.finish().await.unwrap();
        drop(writer);

        let mut reader = fs.open_read(&p("/test.txt")).await.unwrap();
        assert_eq!(reader.read_chunk(5).await.unwrap(), b"Hello");
        assert_eq!(reader.read_chunk(100).await.unwrap(), b", Local!");
        assert!(reader.read_chunk(100).await.unwrap().is_empty());

        let stat = fs.stat(&p("/test.txt")).await.unwrap();
        assert!(!stat.is_directory);
        assert_eq!(stat.size, Some(data.len() as u64));
    }

    #[tokio::test]
    async fn test_local_mkdir_and_list() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFs::new(temp.path()).unwrap();

        fs.mkdir(&p("/dir")).await.unwrap();
        assert!(fs.mkdir(&p("/dir")).await.unwrap_err().is_already_exists());
        assert!(fs.mkdir(&p("/x/y")).await.unwrap_err().is_not_found());

        std::fs::write(temp.path().join("dir/file1.txt"), b"1").unwrap();
        std::fs::create_dir(temp.path().join("dir/sub")).unwrap();

        let mut entries = fs.list_dir(&p("/dir")).await.unwrap();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, p("/dir/file1.txt"));
        assert_eq!(entries[0].size, Some(1));
        assert!(entries[1].is_directory);
    }

    #[tokio::test]
    async fn test_local_list_keeps_backslash_names() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("good.txt"), b"1").unwrap();
        std::fs::write(temp.path().join("weird\\name.txt"), b"22").unwrap();
        let fs = LocalFs::new(temp.path()).unwrap();

        let mut names: Vec<String> = fs
            .list_dir(&RemotePath::root())
            .await
            .unwrap()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["good.txt", "weird\\name.txt"]);

        let stat = fs.stat(&p("/weird\\name.txt")).await.unwrap();
        assert_eq!(stat.size, Some(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_list_skips_fifo() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("plain.txt"), b"1").unwrap();
        let status = std::process::Command::new("mkfifo")
            .arg(temp.path().join("pipe"))
            .status()
            .unwrap();
        assert!(status.success());
        let fs = LocalFs::new(temp.path()).unwrap();

        let entries = fs.list_dir(&RemotePath::root()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, p("/plain.txt"));
    }

    #[tokio::test]
    async fn test_local_stat_missing() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFs::new(temp.path()).unwrap();
        assert!(fs.stat(&p("/nope")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_local_digest() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("f"), b"abc").unwrap();

        let fs = LocalFs::new(temp.path()).unwrap();
        let reply = fs.digest(&p("/f"), DigestAlgorithm::Sha256).await.unwrap();
        assert_eq!(
            reply,
            DigestReply::Digest(ContentHasher::digest_hex(DigestAlgorithm::Sha256, b"abc"))
        );

        let fs = fs.with_digest_support(false);
        let reply = fs.digest(&p("/f"), DigestAlgorithm::Sha256).await.unwrap();
        assert_eq!(reply, DigestReply::Unsupported);
    }

    #[test]
    fn test_missing_root_rejected() {
        let temp = TempDir::new().unwrap();
        assert!(LocalFs::new(temp.path().join("absent")).is_err());
    }
}
