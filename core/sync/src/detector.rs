//! Change detection against a persisted watermark.

use std::collections::VecDeque;
use tracing::{debug, info};

use mirrorsync_common::{Error, RemotePath, Result, Timestamp};
use mirrorsync_storage::RemoteFs;

use crate::watermark::WatermarkStore;

/// Files judged new for one run, in discovery order.
pub type FileChangeSet = Vec<RemotePath>;

/// Outcome of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// New files, in breadth-first discovery order.
    pub changes: FileChangeSet,
    /// Watermark the pass started from.
    pub previous_watermark: Timestamp,
    /// `max(previous_watermark, newest matched modification time)`.
    pub watermark: Timestamp,
    /// Number of directories listed.
    pub directories_scanned: usize,
}

/// Walk `root` breadth-first and collect files modified after `watermark`.
///
/// A file qualifies iff its modification time is strictly greater than the
/// watermark. Entries of each directory are visited in name order so the
/// result does not depend on the provider's listing order.
///
/// # Errors
/// - `Error::ListingFailed` if any directory cannot be listed; nothing is
///   returned for the partial walk
pub async fn detect(
    client: &dyn RemoteFs,
    root: &RemotePath,
    watermark: Timestamp,
) -> Result<Detection> {
    let mut queue = VecDeque::from([root.clone()]);
    let mut changes = Vec::new();
    let mut latest = watermark;
    let mut directories_scanned = 0;

    while let Some(dir) = queue.pop_front() {
        debug!("Listing files in {}", dir);
        let mut entries = client
            .list_dir(&dir)
            .await
            .map_err(|e| Error::ListingFailed {
                path: dir.to_string(),
                reason: e.to_string(),
            })?;
        directories_scanned += 1;
        entries.sort_by(|a, b| a.name().cmp(b.name()));

        for entry in entries {
            if entry.is_directory {
                queue.push_back(entry.path);
            } else if entry.modified > watermark {
                info!(modified = entry.modified, "Found new file: {}", entry.path);
                latest = latest.max(entry.modified);
                changes.push(entry.path);
            }
        }
    }

    info!(
        "Found {} new files under {} ({} directories scanned)",
        changes.len(),
        root,
        directories_scanned
    );

    Ok(Detection {
        changes,
        previous_watermark: watermark,
        watermark: latest,
        directories_scanned,
    })
}

/// Run [`detect`] with the watermark stored under `key` and write the new
/// watermark back exactly once.
///
/// The watermark is rewritten even when nothing changed. On a listing failure
/// the store is left untouched.
pub async fn detect_and_commit(
    client: &dyn RemoteFs,
    root: &RemotePath,
    store: &dyn WatermarkStore,
    key: &str,
) -> Result<Detection> {
    let watermark = store.get(key).await?;
    let detection = detect(client, root, watermark).await?;
    store.set(key, detection.watermark).await?;

    info!(
        "Watermark '{}' advanced from {} to {}",
        key, detection.previous_watermark, detection.watermark
    );
    Ok(detection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watermark::MemoryWatermarkStore;
    use mirrorsync_storage::{Fault, LocalFs, MemoryFs};
    use proptest::prelude::*;

    fn paths(detection: &Detection) -> Vec<String> {
        detection.changes.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_single_nested_file() {
        let fs = MemoryFs::new();
        fs.insert_file("/a/b/report.csv", b"data".to_vec(), 500).unwrap();

        let detection = detect(&fs, &RemotePath::root(), 100).await.unwrap();
        assert_eq!(paths(&detection), vec!["/a/b/report.csv"]);
        assert_eq!(detection.watermark, 500);
        assert_eq!(detection.previous_watermark, 100);
    }

    #[tokio::test]
    async fn test_strictly_greater_than_watermark() {
        let fs = MemoryFs::new();
        fs.insert_file("/equal.txt", vec![1], 100).unwrap();
        fs.insert_file("/older.txt", vec![1], 99).unwrap();
        fs.insert_file("/newer.txt", vec![1], 101).unwrap();

        let detection = detect(&fs, &RemotePath::root(), 100).await.unwrap();
        assert_eq!(paths(&detection), vec!["/newer.txt"]);
        assert_eq!(detection.watermark, 101);
    }

    #[tokio::test]
    async fn test_no_matches_keeps_watermark() {
        let fs = MemoryFs::new();
        fs.insert_file("/old.txt", vec![1], 10).unwrap();

        let detection = detect(&fs, &RemotePath::root(), 50).await.unwrap();
        assert!(detection.changes.is_empty());
        assert_eq!(detection.watermark, 50);
    }

    #[tokio::test]
    async fn test_breadth_first_order() {
        let fs = MemoryFs::new();
        fs.insert_file("/x/deep/f3", vec![1], 10).unwrap();
        fs.insert_file("/x/f2", vec![1], 10).unwrap();
        fs.insert_file("/y/f4", vec![1], 10).unwrap();
        fs.insert_file("/f1", vec![1], 10).unwrap();

        let detection = detect(&fs, &RemotePath::root(), 0).await.unwrap();
        assert_eq!(paths(&detection), vec!["/f1", "/x/f2", "/y/f4", "/x/deep/f3"]);
        assert_eq!(detection.directories_scanned, 4);
    }

    #[tokio::test]
    async fn test_directories_do_not_raise_watermark() {
        let fs = MemoryFs::new();
        fs.insert_dir("/fresh-dir", 9_999).unwrap();
        fs.insert_file("/file", vec![1], 200).unwrap();

        let detection = detect(&fs, &RemotePath::root(), 100).await.unwrap();
        assert_eq!(detection.watermark, 200);
    }

    #[tokio::test]
    async fn test_scoped_to_root() {
        let fs = MemoryFs::new();
        fs.insert_file("/home/user/in.txt", vec![1], 10).unwrap();
        fs.insert_file("/elsewhere/out.txt", vec![1], 10).unwrap();

        let root = RemotePath::parse("/home/user").unwrap();
        let detection = detect(&fs, &root, 0).await.unwrap();
        assert_eq!(paths(&detection), vec!["/home/user/in.txt"]);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_pass() {
        let fs = MemoryFs::new();
        fs.insert_file("/ok/a.txt", vec![1], 10).unwrap();
        fs.insert_file("/broken/b.txt", vec![1], 10).unwrap();
        fs.inject_fault("/broken", Fault::List).unwrap();

        let err = detect(&fs, &RemotePath::root(), 0).await.unwrap_err();
        match err {
            Error::ListingFailed { path, .. } => assert_eq!(path, "/broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_root_is_listing_failure() {
        let fs = MemoryFs::new();
        let root = RemotePath::parse("/nope").unwrap();
        assert!(matches!(
            detect(&fs, &root, 0).await,
            Err(Error::ListingFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_tree_with_odd_entries() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("good.txt"), b"1").unwrap();
        std::fs::write(temp.path().join("weird\\name.txt"), b"2").unwrap();
        #[cfg(unix)]
        {
            let status = std::process::Command::new("mkfifo")
                .arg(temp.path().join("pipe"))
                .status()
                .unwrap();
            assert!(status.success());
        }
        let fs = LocalFs::new(temp.path()).unwrap();

        let detection = detect(&fs, &RemotePath::root(), 0).await.unwrap();
        assert_eq!(paths(&detection), vec!["/good.txt", "/weird\\name.txt"]);
    }

    #[tokio::test]
    async fn test_second_pass_is_empty() {
        let fs = MemoryFs::new();
        fs.insert_file("/a/1", vec![1], 300).unwrap();
        fs.insert_file("/b/2", vec![1], 700).unwrap();

        let first = detect(&fs, &RemotePath::root(), 0).await.unwrap();
        assert_eq!(first.changes.len(), 2);

        let second = detect(&fs, &RemotePath::root(), first.watermark).await.unwrap();
        assert!(second.changes.is_empty());
        assert_eq!(second.watermark, first.watermark);
    }

    #[tokio::test]
    async fn test_commit_writes_watermark_once() {
        let fs = MemoryFs::new();
        fs.insert_file("/a/report.csv", vec![1], 500).unwrap();
        let store = MemoryWatermarkStore::new();
        store.set("KEY", 100).await.unwrap();

        let detection = detect_and_commit(&fs, &RemotePath::root(), &store, "KEY")
            .await
            .unwrap();
        assert_eq!(detection.changes.len(), 1);
        assert_eq!(store.get("KEY").await.unwrap(), 500);

        let again = detect_and_commit(&fs, &RemotePath::root(), &store, "KEY")
            .await
            .unwrap();
        assert!(again.changes.is_empty());
        assert_eq!(store.get("KEY").await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_commit_skipped_on_listing_failure() {
        let fs = MemoryFs::new();
        fs.insert_file("/a/report.csv", vec![1], 500).unwrap();
        fs.inject_fault("/a", Fault::List).unwrap();
        let store = MemoryWatermarkStore::new();
        store.set("KEY", 100).await.unwrap();

        assert!(detect_and_commit(&fs, &RemotePath::root(), &store, "KEY")
            .await
            .is_err());
        assert_eq!(store.get("KEY").await.unwrap(), 100);
    }

    proptest! {
        #[test]
        fn prop_detect_matches_filter(
            mtimes in proptest::collection::vec(0i64..1_000, 0..24),
            watermark in 0i64..1_000,
        ) {
            let fs = MemoryFs::new();
            for (i, mtime) in mtimes.iter().enumerate() {
                fs.insert_file(&format!("/d{}/f{}", i % 3, i), vec![0], *mtime).unwrap();
            }

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let detection = runtime
                .block_on(detect(&fs, &RemotePath::root(), watermark))
                .unwrap();

            let expected: usize = mtimes.iter().filter(|m| **m > watermark).count();
            let newest = mtimes.iter().copied().filter(|m| *m > watermark).max();
            prop_assert_eq!(detection.changes.len(), expected);
            prop_assert_eq!(detection.watermark, newest.map_or(watermark, |m| m.max(watermark)));
            prop_assert!(detection.watermark >= watermark);
        }
    }
}
