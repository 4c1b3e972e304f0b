//! In-memory remote filesystem for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use mirrorsync_common::{Error, RemotePath, Result, Timestamp};

use crate::digest::{ContentHasher, DigestAlgorithm};
use crate::provider::{
    Connect, DigestReply, FileStat, RemoteEntry, RemoteFs, RemoteReader, RemoteWriter,
};

/// In-memory storage entry.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, modified: Timestamp },
    Directory { modified: Timestamp },
}

impl Entry {
    fn stat(&self) -> FileStat {
        match self {
            Entry::File { data, modified } => FileStat {
                is_directory: false,
                size: Some(data.len() as u64),
                modified: *modified,
            },
            Entry::Directory { modified } => FileStat {
                is_directory: true,
                size: None,
                modified: *modified,
            },
        }
    }
}

/// Failure to inject on a specific path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `list_dir` fails.
    List,
    /// `stat` fails with a storage error.
    Stat,
    /// `mkdir` fails with a storage error.
    Mkdir,
    /// `open_read` / `open_write` fail.
    Open,
    /// Reading fails after this many successful chunks.
    Read { after_chunks: usize },
    /// Writing fails after this many successful chunks.
    Write { after_chunks: usize },
    /// `digest` fails with a protocol-level error.
    Digest,
    /// Reading never completes.
    Stall,
    /// Every read yields to the scheduler before returning.
    Slow,
}

/// Snapshot of operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub stats: usize,
    pub lists: usize,
    pub mkdirs: usize,
    pub reads: usize,
    pub writes: usize,
    pub digests: usize,
    pub connects: usize,
}

#[derive(Default)]
struct Counters {
    stats: AtomicUsize,
    lists: AtomicUsize,
    mkdirs: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
    digests: AtomicUsize,
    connects: AtomicUsize,
    open_handles: AtomicUsize,
    peak_handles: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Decrements the open-handle count when dropped.
struct HandleGuard(Arc<Counters>);

impl HandleGuard {
    fn new(counters: Arc<Counters>) -> Self {
        let open = counters.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_handles.fetch_max(open, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.0.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

type Storage = Arc<RwLock<BTreeMap<String, Entry>>>;

/// In-memory remote filesystem.
///
/// Useful for testing and development. Clones share the same tree, so each
/// clone behaves like another connection to the same server. Writes land in
/// the tree chunk by chunk, which leaves partial files behind when a transfer
/// is interrupted.
#[derive(Clone)]
pub struct MemoryFs {
    storage: Storage,
    faults: Arc<RwLock<HashMap<String, Vec<Fault>>>>,
    digest_enabled: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl MemoryFs {
    /// Create a new tree containing only the root directory.
    pub fn new() -> Self {
        let mut tree = BTreeMap::new();
        tree.insert("/".to_string(), Entry::Directory { modified: 0 });

        Self {
            storage: Arc::new(RwLock::new(tree)),
            faults: Arc::new(RwLock::new(HashMap::new())),
            digest_enabled: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Enable or disable the digest capability.
    pub fn with_digest_support(self, enabled: bool) -> Self {
        self.set_digest_support(enabled);
        self
    }

    /// Enable or disable the digest capability on a live tree.
    pub fn set_digest_support(&self, enabled: bool) {
        self.digest_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Insert a file, creating missing ancestors with the same timestamp.
    pub fn insert_file(&self, path: &str, data: impl Into<Vec<u8>>, modified: Timestamp) -> Result<()> {
        let path = RemotePath::parse(path)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidInput("Cannot write to root".to_string()))?;
        self.insert_dir_all(&parent, modified)?;

        let mut storage = self.write_storage();
        if let Some(Entry::Directory { .. }) = storage.get(&path.to_string()) {
            return Err(Error::AlreadyExists(format!("{} is a directory", path)));
        }
        storage.insert(
            path.to_string(),
            Entry::File {
                data: data.into(),
                modified,
            },
        );
        Ok(())
    }

    /// Insert a directory and any missing ancestors.
    pub fn insert_dir(&self, path: &str, modified: Timestamp) -> Result<()> {
        self.insert_dir_all(&RemotePath::parse(path)?, modified)
    }

    fn insert_dir_all(&self, path: &RemotePath, modified: Timestamp) -> Result<()> {
        let mut storage = self.write_storage();
        for prefix in path.prefixes() {
            let key = prefix.to_string();
            match storage.get(&key) {
                Some(Entry::Directory { .. }) => {}
                Some(Entry::File { .. }) => {
                    return Err(Error::DirectoryConflict { path: key });
                }
                None => {
                    storage.insert(key, Entry::Directory { modified });
                }
            }
        }
        Ok(())
    }

    /// Content of a file, if one exists at `path`.
    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        let key = RemotePath::parse(path).ok()?.to_string();
        match self.read_storage().get(&key) {
            Some(Entry::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Whether anything exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        RemotePath::parse(path)
            .map(|p| self.read_storage().contains_key(&p.to_string()))
            .unwrap_or(false)
    }

    /// Make operations on `path` fail.
    pub fn inject_fault(&self, path: &str, fault: Fault) -> Result<()> {
        let key = RemotePath::parse(path)?.to_string();
        self.faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .push(fault);
        Ok(())
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        self.faults
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Snapshot of the operation counters.
    pub fn op_counts(&self) -> OpCounts {
        let c = &self.counters;
        OpCounts {
            stats: c.stats.load(Ordering::SeqCst),
            lists: c.lists.load(Ordering::SeqCst),
            mkdirs: c.mkdirs.load(Ordering::SeqCst),
            reads: c.reads.load(Ordering::SeqCst),
            writes: c.writes.load(Ordering::SeqCst),
            digests: c.digests.load(Ordering::SeqCst),
            connects: c.connects.load(Ordering::SeqCst),
        }
    }

    /// Number of reader and writer handles currently open.
    pub fn open_handles(&self) -> usize {
        self.counters.open_handles.load(Ordering::SeqCst)
    }

    /// Highest number of handles that were open at the same time.
    pub fn peak_open_handles(&self) -> usize {
        self.counters.peak_handles.load(Ordering::SeqCst)
    }

    fn read_storage(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_storage(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn fault(&self, key: &str, pred: impl Fn(&Fault) -> bool) -> Option<Fault> {
        self.faults
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|faults| faults.iter().copied().find(|f| pred(f)))
    }

    fn injected(operation: &str, path: &RemotePath) -> Error {
        Error::Storage(format!("injected {} failure on {}", operation, path))
    }

    fn check_parent_dir(storage: &BTreeMap<String, Entry>, path: &RemotePath) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidInput("Root has no parent".to_string()))?;
        match storage.get(&parent.to_string()) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => {
                Err(Error::InvalidInput(format!("Parent is a file: {}", parent)))
            }
            None => Err(Error::NotFound(format!(
                "Parent directory not found: {}",
                parent
            ))),
        }
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteFs for MemoryFs {
    fn name(&self) -> &str {
        "memory"
    }

    async fn stat(&self, path: &RemotePath) -> Result<FileStat> {
        bump(&self.counters.stats);
        let key = path.to_string();
        if self.fault(&key, |f| *f == Fault::Stat).is_some() {
            return Err(Self::injected("stat", path));
        }

        match self.read_storage().get(&key) {
            Some(entry) => Ok(entry.stat()),
            None => Err(Error::NotFound(format!("Path not found: {}", path))),
        }
    }

    async fn list_dir(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>> {
        bump(&self.counters.lists);
        let key = path.to_string();
        if self.fault(&key, |f| *f == Fault::List).is_some() {
            return Err(Self::injected("list", path));
        }

        let storage = self.read_storage();
        match storage.get(&key) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => {
                return Err(Error::InvalidInput(format!("Not a directory: {}", path)));
            }
            None => {
                return Err(Error::NotFound(format!("Directory not found: {}", path)));
            }
        }

        let prefix = if path.is_root() {
            "/".to_string()
        } else {
            format!("{}/", key)
        };

        let mut results = Vec::new();
        for (entry_key, entry) in storage.range(prefix.clone()..) {
            let Some(relative) = entry_key.strip_prefix(&prefix) else {
                break;
            };
            // Only direct children
            if relative.is_empty() || relative.contains('/') {
                continue;
            }
            let stat = entry.stat();
            results.push(RemoteEntry {
                path: path.join(relative)?,
                is_directory: stat.is_directory,
                modified: stat.modified,
                size: stat.size,
            });
        }

        Ok(results)
    }

    async fn mkdir(&self, path: &RemotePath) -> Result<()> {
        bump(&self.counters.mkdirs);
        let key = path.to_string();
        if self.fault(&key, |f| *f == Fault::Mkdir).is_some() {
            return Err(Self::injected("mkdir", path));
        }

        let mut storage = self.write_storage();
        if storage.contains_key(&key) {
            return Err(Error::AlreadyExists(format!("Path already exists: {}", path)));
        }
        Self::check_parent_dir(&storage, path)?;

        storage.insert(
            key,
            Entry::Directory {
                modified: Utc::now().timestamp(),
            },
        );
        Ok(())
    }

    async fn open_read(&self, path: &RemotePath) -> Result<Box<dyn RemoteReader>> {
        let key = path.to_string();
        if self.fault(&key, |f| *f == Fault::Open).is_some() {
            return Err(Self::injected("open", path));
        }

        let data = match self.read_storage().get(&key) {
            Some(Entry::File { data, .. }) => data.clone(),
            Some(Entry::Directory { .. }) => {
                return Err(Error::InvalidInput(format!("Cannot read directory: {}", path)));
            }
            None => return Err(Error::NotFound(format!("File not found: {}", path))),
        };

        let fail_after = match self.fault(&key, |f| matches!(f, Fault::Read { .. })) {
            Some(Fault::Read { after_chunks }) => Some(after_chunks),
            _ => None,
        };
        let stall = self.fault(&key, |f| *f == Fault::Stall).is_some();
        let slow = self.fault(&key, |f| *f == Fault::Slow).is_some();

        Ok(Box::new(MemoryReader {
            path: path.clone(),
            data,
            position: 0,
            chunks_read: 0,
            fail_after,
            stall,
            slow,
            counters: self.counters.clone(),
            _guard: HandleGuard::new(self.counters.clone()),
        }))
    }

    async fn open_write(&self, path: &RemotePath) -> Result<Box<dyn RemoteWriter>> {
        let key = path.to_string();
        if self.fault(&key, |f| *f == Fault::Open).is_some() {
            return Err(Self::injected("open", path));
        }

        {
            let mut storage = self.write_storage();
            if let Some(Entry::Directory { .. }) = storage.get(&key) {
                return Err(Error::InvalidInput(format!("Cannot write directory: {}", path)));
            }
            Self::check_parent_dir(&storage, path)?;
            storage.insert(
                key.clone(),
                Entry::File {
                    data: Vec::new(),
                    modified: Utc::now().timestamp(),
                },
            );
        }

        let fail_after = match self.fault(&key, |f| matches!(f, Fault::Write { .. })) {
            Some(Fault::Write { after_chunks }) => Some(after_chunks),
            _ => None,
        };

        Ok(Box::new(MemoryWriter {
            path: path.clone(),
            storage: self.storage.clone(),
            chunks_written: 0,
            fail_after,
            counters: self.counters.clone(),
            _guard: HandleGuard::new(self.counters.clone()),
        }))
    }

    async fn digest(&self, path: &RemotePath, algorithm: DigestAlgorithm) -> Result<DigestReply> {
        bump(&self.counters.digests);
        if !self.digest_enabled.load(Ordering::SeqCst) {
            return Ok(DigestReply::Unsupported);
        }
        let key = path.to_string();
        if self.fault(&key, |f| *f == Fault::Digest).is_some() {
            return Err(Self::injected("digest", path));
        }

        match self.read_storage().get(&key) {
            Some(Entry::File { data, .. }) => {
                Ok(DigestReply::Digest(ContentHasher::digest_hex(algorithm, data)))
            }
            Some(Entry::Directory { .. }) => {
                Err(Error::InvalidInput(format!("Cannot digest directory: {}", path)))
            }
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }
}

#[async_trait]
impl Connect for MemoryFs {
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>> {
        bump(&self.counters.connects);
        Ok(Arc::new(self.clone()))
    }
}

struct MemoryReader {
    path: RemotePath,
    data: Vec<u8>,
    position: usize,
    chunks_read: usize,
    fail_after: Option<usize>,
    stall: bool,
    slow: bool,
    counters: Arc<Counters>,
    _guard: HandleGuard,
}

#[async_trait]
impl RemoteReader for MemoryReader {
    async fn read_chunk(&mut self, max_len: usize) -> Result<Vec<u8>> {
        bump(&self.counters.reads);
        if self.stall {
            std::future::pending::<()>().await;
        }
        if self.slow {
            tokio::task::yield_now().await;
        }
        if self.fail_after.is_some_and(|n| self.chunks_read >= n) {
            return Err(MemoryFs::injected("read", &self.path));
        }

        let end = self.data.len().min(self.position + max_len);
        let chunk = self.data[self.position..end].to_vec();
        self.position = end;
        self.chunks_read += 1;
        Ok(chunk)
    }
}

struct MemoryWriter {
    path: RemotePath,
    storage: Storage,
    chunks_written: usize,
    fail_after: Option<usize>,
    counters: Arc<Counters>,
    _guard: HandleGuard,
}

#[async_trait]
impl RemoteWriter for MemoryWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        bump(&self.counters.writes);
        if self.fail_after.is_some_and(|n| self.chunks_written >= n) {
            return Err(MemoryFs::injected("write", &self.path));
        }

        let mut storage = self.storage.write().unwrap_or_else(PoisonError::into_inner);
        match storage.get_mut(&self.path.to_string()) {
            Some(Entry::File { data, modified }) => {
                data.extend_from_slice(chunk);
                *modified = Utc::now().timestamp();
            }
            _ => {
                return Err(Error::NotFound(format!(
                    "File removed during write: {}",
                    self.path
                )));
            }
        }
        self.chunks_written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(path: &str) -> RemotePath {
        RemotePath::parse(path).unwrap()
    }

    #[tokio::test]
    async fn test_insert_creates_ancestors() {
        let fs = MemoryFs::new();
        fs.insert_file("/a/b/report.csv", b"x".to_vec(), 500).unwrap();

        assert!(fs.stat(&p("/a")).await.unwrap().is_directory);
        assert!(fs.stat(&p("/a/b")).await.unwrap().is_directory);
        let stat = fs.stat(&p("/a/b/report.csv")).await.unwrap();
        assert_eq!(stat.size, Some(1));
        assert_eq!(stat.modified, 500);
    }

    #[tokio::test]
    async fn test_stat_missing_is_not_found() {
        let fs = MemoryFs::new();
        let err = fs.stat(&p("/missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_direct_children_only() {
        let fs = MemoryFs::new();
        fs.insert_file("/dir/file1.txt", vec![1], 1).unwrap();
        fs.insert_file("/dir/file2.txt", vec![2], 2).unwrap();
        fs.insert_file("/dir/sub/deep.txt", vec![3], 3).unwrap();
        fs.insert_file("/dir2/other.txt", vec![4], 4).unwrap();

        let names: Vec<String> = fs
            .list_dir(&p("/dir"))
            .await
            .unwrap()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["file1.txt", "file2.txt", "sub"]);

        let root: Vec<String> = fs
            .list_dir(&RemotePath::root())
            .await
            .unwrap()
            .iter()
            .map(|e| e.path.to_string())
            .collect();
        assert_eq!(root, vec!["/dir", "/dir2"]);
    }

    #[tokio::test]
    async fn test_mkdir_requires_parent_and_rejects_existing() {
        let fs = MemoryFs::new();
        assert!(fs.mkdir(&p("/a/b")).await.unwrap_err().is_not_found());

        fs.mkdir(&p("/a")).await.unwrap();
        fs.mkdir(&p("/a/b")).await.unwrap();
        assert!(fs.mkdir(&p("/a")).await.unwrap_err().is_already_exists());
        assert_eq!(fs.op_counts().mkdirs, 4);
    }

    #[tokio::test]
    async fn test_read_in_chunks() {
        let fs = MemoryFs::new();
        fs.insert_file("/f", vec![7u8; 10], 1).unwrap();

        let mut reader = fs.open_read(&p("/f")).await.unwrap();
        assert_eq!(fs.open_handles(), 1);
        assert_eq!(reader.read_chunk(4).await.unwrap().len(), 4);
        assert_eq!(reader.read_chunk(4).await.unwrap().len(), 4);
        assert_eq!(reader.read_chunk(4).await.unwrap().len(), 2);
        assert!(reader.read_chunk(4).await.unwrap().is_empty());
        drop(reader);

        assert_eq!(fs.open_handles(), 0);
        assert_eq!(fs.op_counts().reads, 4);
    }

    #[tokio::test]
    async fn test_peak_handles_tracked() {
        let fs = MemoryFs::new();
        fs.insert_file("/a", vec![1], 1).unwrap();
        fs.insert_file("/b", vec![2], 1).unwrap();

        let first = fs.open_read(&p("/a")).await.unwrap();
        let second = fs.open_read(&p("/b")).await.unwrap();
        drop(first);
        drop(second);
        let third = fs.open_read(&p("/a")).await.unwrap();
        drop(third);

        assert_eq!(fs.open_handles(), 0);
        assert_eq!(fs.peak_open_handles(), 2);
    }

    #[tokio::test]
    async fn test_write_lands_incrementally() {
        let fs = MemoryFs::new();
        fs.insert_dir("/out", 1).unwrap();
        fs.inject_fault("/out/f", Fault::Write { after_chunks: 1 }).unwrap();

        let mut writer = fs.open_write(&p("/out/f")).await.unwrap();
        writer.write_chunk(b"abc").await.unwrap();
        assert!(writer.write_chunk(b"def").await.is_err());
        drop(writer);

        assert_eq!(fs.file_content("/out/f").unwrap(), b"abc");
        assert_eq!(fs.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_digest_toggle_and_fault() {
        let fs = MemoryFs::new();
        fs.insert_file("/f", b"abc".to_vec(), 1).unwrap();

        let reply = fs.digest(&p("/f"), DigestAlgorithm::Sha256).await.unwrap();
        assert_eq!(
            reply,
            DigestReply::Digest(ContentHasher::digest_hex(DigestAlgorithm::Sha256, b"abc"))
        );

        fs.inject_fault("/f", Fault::Digest).unwrap();
        assert!(fs.digest(&p("/f"), DigestAlgorithm::Sha256).await.is_err());

        fs.set_digest_support(false);
        let reply = fs.digest(&p("/f"), DigestAlgorithm::Sha256).await.unwrap();
        assert_eq!(reply, DigestReply::Unsupported);
    }

    #[tokio::test]
    async fn test_connections_share_tree() {
        let fs = MemoryFs::new();
        let conn = fs.connect().await.unwrap();
        conn.mkdir(&p("/shared")).await.unwrap();

        assert!(fs.contains("/shared"));
        assert_eq!(fs.op_counts().connects, 1);
    }
}
