//! Pluggable batch persistence (spec §6's storage interface). The rollup
//! core never assumes a particular backend; it calls out to a [`KvStore`].

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use quids_common::QuidsError;

// async_trait because dyn KvStore needs to be object-safe.
#[async_trait::async_trait]
pub trait KvStore: Debug + Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, QuidsError>;
    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), QuidsError>;
    async fn delete(&self, key: &[u8]) -> Result<(), QuidsError>;

    /// Reclaims space left behind by overwritten/deleted entries. A no-op
    /// for backends with nothing to reclaim.
    async fn compact(&self) -> Result<(), QuidsError>;

    /// A consistent point-in-time copy of every entry, usable for backup or
    /// for seeding a fresh backend without pausing writers.
    async fn snapshot(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, QuidsError>;
}

/// In-process `KvStore` backed by a `HashMap`. Suitable for tests and single
/// process deployments; nothing here is durable across a restart.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, QuidsError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), QuidsError> {
        self.entries.write().await.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), QuidsError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn compact(&self) -> Result<(), QuidsError> {
        // A HashMap has nothing to reclaim; compaction is a durable-backend
        // concern (LSM levels, WAL truncation) this backend doesn't have.
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, QuidsError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// On-disk entry shape for [`FileKvStore`]; keys/values round-trip as plain
/// byte arrays under serde_json, which can't use `Vec<u8>` directly as a map
/// key, hence a flat entry list rather than a `HashMap`.
#[derive(Serialize, Deserialize)]
struct FileEntry {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// `KvStore` backed by a single JSON file, so that independent process
/// invocations (a long-running `serve` and a one-shot `exit`) observe the
/// same persisted state. Whole-file rewrite on every mutation; fine for the
/// account-history and batch-header volumes this core produces, not a
/// substitute for a real embedded database.
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl FileKvStore {
    /// Loads `path` if it exists, otherwise starts empty; the file is
    /// created on the first successful write.
    pub fn open(path: PathBuf) -> Result<Self, QuidsError> {
        let entries = match std::fs::read(&path) {
            Ok(bytes) => {
                let loaded: Vec<FileEntry> = serde_json::from_slice(&bytes)
                    .map_err(|e| QuidsError::io_failure(format!("parsing store file {}: {e}", path.display())))?;
                loaded.into_iter().map(|e| (e.key, e.value)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(QuidsError::io_failure(format!("reading store file {}: {e}", path.display()))),
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn flush(&self, entries: &HashMap<Vec<u8>, Vec<u8>>) -> Result<(), QuidsError> {
        let out: Vec<FileEntry> = entries
            .iter()
            .map(|(k, v)| FileEntry { key: k.clone(), value: v.clone() })
            .collect();
        let bytes = serde_json::to_vec(&out)
            .map_err(|e| QuidsError::io_failure(format!("encoding store file: {e}")))?;
        std::fs::write(&self.path, bytes)
            .map_err(|e| QuidsError::io_failure(format!("writing store file {}: {e}", self.path.display())))
    }
}

#[async_trait::async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, QuidsError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), QuidsError> {
        let mut guard = self.entries.write().await;
        guard.insert(key, value);
        self.flush(&guard).await
    }

    async fn delete(&self, key: &[u8]) -> Result<(), QuidsError> {
        let mut guard = self.entries.write().await;
        guard.remove(key);
        self.flush(&guard).await
    }

    async fn compact(&self) -> Result<(), QuidsError> {
        let guard = self.entries.read().await;
        self.flush(&guard).await
    }

    async fn snapshot(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, QuidsError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryKvStore::new();
        store.put(b"batch-1".to_vec(), b"payload".to_vec()).await.expect("put");
        let value = store.get(b"batch-1").await.expect("get");
        assert_eq!(value, Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_the_entry() {
        let store = InMemoryKvStore::new();
        store.put(b"k".to_vec(), b"v".to_vec()).await.expect("put");
        store.delete(b"k").await.expect("delete");
        assert_eq!(store.get(b"k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store = InMemoryKvStore::new();
        assert_eq!(store.get(b"absent").await.expect("get"), None);
    }

    #[tokio::test]
    async fn snapshot_reflects_puts_and_deletes() {
        let store = InMemoryKvStore::new();
        store.put(b"a".to_vec(), b"1".to_vec()).await.expect("put");
        store.put(b"b".to_vec(), b"2".to_vec()).await.expect("put");
        store.delete(b"a").await.expect("delete");

        let mut snapshot = store.snapshot().await.expect("snapshot");
        snapshot.sort();
        assert_eq!(snapshot, vec![(b"b".to_vec(), b"2".to_vec())]);
    }

    #[tokio::test]
    async fn compact_is_a_harmless_no_op() {
        let store = InMemoryKvStore::new();
        store.put(b"k".to_vec(), b"v".to_vec()).await.expect("put");
        store.compact().await.expect("compact");
        assert_eq!(store.get(b"k").await.expect("get"), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn file_store_survives_being_reopened_from_the_same_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");

        let store = FileKvStore::open(path.clone()).expect("open");
        store.put(b"account:alice".to_vec(), b"balance:1000".to_vec()).await.expect("put");
        drop(store);

        let reopened = FileKvStore::open(path).expect("reopen");
        assert_eq!(
            reopened.get(b"account:alice").await.expect("get"),
            Some(b"balance:1000".to_vec())
        );
    }

    #[tokio::test]
    async fn file_store_with_no_existing_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKvStore::open(dir.path().join("absent.json")).expect("open");
        assert_eq!(store.get(b"anything").await.expect("get"), None);
    }

    #[tokio::test]
    async fn file_store_delete_removes_the_entry_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");

        let store = FileKvStore::open(path.clone()).expect("open");
        store.put(b"k".to_vec(), b"v".to_vec()).await.expect("put");
        store.delete(b"k").await.expect("delete");
        drop(store);

        let reopened = FileKvStore::open(path).expect("reopen");
        assert_eq!(reopened.get(b"k").await.expect("get"), None);
    }
}
