//! Durable room snapshots.
//!
//! A snapshot is the full saved document of one room. The server writes
//! one on a timer while the room is dirty and once more before evicting
//! it, then reads it back when someone joins the room again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::RoomId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub doc_id: RoomId,
    pub bytes: Vec<u8>,
    /// Unix milliseconds
    pub saved_at_ms: u64,
}

impl Snapshot {
    pub fn new(doc_id: RoomId, bytes: Vec<u8>) -> Self {
        let saved_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            doc_id,
            bytes,
            saved_at_ms,
        }
    }

    /// Read a snapshot file written by [`FileSnapshotStore`]
    pub async fn read_from(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
        Ok(rmp_serde::from_slice(&data)?)
    }
}

/// Where room snapshots live
#[async_trait]
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    async fn load(&self, doc_id: &RoomId) -> Result<Option<Snapshot>>;
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// One msgpack file per room under a directory
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_DATA_HOME/gridcanvas/snapshots` or the platform equivalent
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gridcanvas")
            .join("snapshots")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Room ids are client-chosen, so the file name is their hex encoding
    pub fn path_for(&self, doc_id: &RoomId) -> PathBuf {
        self.dir
            .join(format!("{}.snapshot", hex::encode(doc_id.as_str())))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, doc_id: &RoomId) -> Result<Option<Snapshot>> {
        let path = self.path_for(doc_id);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                let snapshot: Snapshot = rmp_serde::from_slice(&data)?;
                debug!(room = %doc_id, bytes = snapshot.bytes.len(), "loaded snapshot");
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("{}: {e}", path.display()))),
        }
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.path_for(&snapshot.doc_id);
        let data = rmp_serde::to_vec(snapshot)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Storage(format!("{}: {e}", self.dir.display())))?;

        // Write then rename so a crash never leaves a torn snapshot
        let tmp = path.with_extension("snapshot.tmp");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| Error::Storage(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;

        debug!(room = %snapshot.doc_id, bytes = snapshot.bytes.len(), "saved snapshot");
        Ok(())
    }
}

/// In-process store, for tests and ephemeral servers
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<RoomId, Snapshot>>,
    saves: Mutex<usize>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, doc_id: &RoomId) -> Option<Snapshot> {
        self.snapshots
            .lock()
            .ok()
            .and_then(|map| map.get(doc_id).cloned())
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, doc_id: &RoomId) -> Result<Option<Snapshot>> {
        Ok(self.get(doc_id))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut map = self
            .snapshots
            .lock()
            .map_err(|_| Error::Storage("snapshot map poisoned".into()))?;
        map.insert(snapshot.doc_id.clone(), snapshot.clone());
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}

/// Save with exponential backoff: `attempts` tries, sleeping `backoff`,
/// then twice that, and so on between them
pub async fn save_with_retry(
    store: &dyn SnapshotStore,
    snapshot: &Snapshot,
    attempts: u32,
    backoff: Duration,
) -> Result<()> {
    let mut delay = backoff;
    let mut attempt = 1;
    loop {
        match store.save(snapshot).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(
                    room = %snapshot.doc_id,
                    attempt,
                    error = %e,
                    "snapshot save failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let room = RoomId::from("team/board 1");

        assert!(store.load(&room).await.unwrap().is_none());

        let snapshot = Snapshot::new(room.clone(), vec![9, 8, 7]);
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load(&room).await.unwrap(), Some(snapshot.clone()));

        // Path separators in the id never escape the directory
        let path = store.path_for(&room);
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(Snapshot::read_from(&path).await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_file_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("nested"));
        let room = RoomId::from("r");

        store.save(&Snapshot::new(room.clone(), vec![1])).await.unwrap();
        store.save(&Snapshot::new(room.clone(), vec![2])).await.unwrap();
        assert_eq!(store.load(&room).await.unwrap().unwrap().bytes, vec![2]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        let room = RoomId::from("r");
        std::fs::write(store.path_for(&room), b"not msgpack at all").unwrap();
        assert!(store.load(&room).await.is_err());
    }

    #[derive(Debug, Default)]
    struct Flaky {
        failures_left: AtomicU32,
        inner: MemorySnapshotStore,
    }

    #[async_trait]
    impl SnapshotStore for Flaky {
        async fn load(&self, doc_id: &RoomId) -> Result<Option<Snapshot>> {
            self.inner.load(doc_id).await
        }

        async fn save(&self, snapshot: &Snapshot) -> Result<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Storage("disk full".into()));
            }
            self.inner.save(snapshot).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failure() {
        let store = Flaky {
            failures_left: AtomicU32::new(2),
            ..Default::default()
        };
        let snapshot = Snapshot::new("r".into(), vec![1]);
        save_with_retry(&store, &snapshot, 3, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(store.inner.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let store = Flaky {
            failures_left: AtomicU32::new(5),
            ..Default::default()
        };
        let snapshot = Snapshot::new("r".into(), vec![1]);
        let err = save_with_retry(&store, &snapshot, 3, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.failures_left.load(Ordering::SeqCst), 2);
    }
}
