//! Enactment storage with compare-and-swap updates

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use nmstate_shared_types::{Enactment, EnactmentKey};

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by enactment stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("enactment {0} not found")]
    NotFound(EnactmentKey),

    #[error("enactment {0} already exists")]
    AlreadyExists(EnactmentKey),

    #[error("enactment {key} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        key: EnactmentKey,
        expected: u64,
        actual: u64,
    },

    #[error("invalid enactment key {0}")]
    InvalidKey(EnactmentKey),

    #[error("record for {requested} holds enactment {found}")]
    KeyMismatch {
        requested: EnactmentKey,
        found: EnactmentKey,
    },

    #[error("store lock {} is held by another writer", .0.display())]
    Locked(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Errors caused by a concurrent writer, resolved by refetching
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::AlreadyExists(_)
        )
    }
}

/// Storage seam for enactment records.
///
/// `update` is a compare-and-swap: it only succeeds when the passed record
/// carries the resource version currently stored, and returns the stored
/// record with the bumped version.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnactmentStore: Send + Sync {
    async fn get(&self, key: &EnactmentKey) -> StoreResult<Enactment>;
    async fn create(&self, key: &EnactmentKey) -> StoreResult<Enactment>;
    async fn update(&self, enactment: &Enactment) -> StoreResult<Enactment>;
    async fn delete(&self, key: &EnactmentKey) -> StoreResult<()>;
    async fn list(&self) -> StoreResult<Vec<Enactment>>;
}

fn check_version(current: &Enactment, proposed: &Enactment) -> StoreResult<()> {
    if current.resource_version != proposed.resource_version {
        return Err(StoreError::Conflict {
            key: proposed.key.clone(),
            expected: proposed.resource_version,
            actual: current.resource_version,
        });
    }
    Ok(())
}

/// Process-local store, shared by cloning
#[derive(Clone, Default)]
pub struct InMemoryEnactmentStore {
    records: Arc<RwLock<HashMap<EnactmentKey, Enactment>>>,
}

impl InMemoryEnactmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnactmentStore for InMemoryEnactmentStore {
    async fn get(&self, key: &EnactmentKey) -> StoreResult<Enactment> {
        let guard = self.records.read().await;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn create(&self, key: &EnactmentKey) -> StoreResult<Enactment> {
        let mut guard = self.records.write().await;
        if guard.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.clone()));
        }

        let mut enactment = Enactment::new(key.clone());
        enactment.resource_version = 1;
        guard.insert(key.clone(), enactment.clone());
        Ok(enactment)
    }

    async fn update(&self, enactment: &Enactment) -> StoreResult<Enactment> {
        let mut guard = self.records.write().await;
        let current = guard
            .get_mut(&enactment.key)
            .ok_or_else(|| StoreError::NotFound(enactment.key.clone()))?;
        check_version(current, enactment)?;

        *current = enactment.clone();
        current.resource_version += 1;
        Ok(current.clone())
    }

    async fn delete(&self, key: &EnactmentKey) -> StoreResult<()> {
        let mut guard = self.records.write().await;
        guard
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn list(&self) -> StoreResult<Vec<Enactment>> {
        let guard = self.records.read().await;
        let mut records: Vec<Enactment> = guard.values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}

/// Lock file guarding read-check-write sequences across processes
const LOCK_FILE: &str = ".store.lock";

/// Age after which a lock is considered abandoned
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a writer waits for the lock by default
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Lock file contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    timestamp: i64,
}

/// Exclusive lock file created with `create_new`, removed on drop
#[derive(Debug)]
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    async fn acquire(dir: &Path, wait: Duration) -> StoreResult<Self> {
        let path = dir.join(LOCK_FILE);
        let info = LockInfo {
            pid: std::process::id(),
            timestamp: Utc::now().timestamp(),
        };
        let content = serde_json::to_vec(&info)?;
        let deadline = Instant::now() + wait;

        loop {
            match Self::try_create(&path, &content).await {
                Ok(()) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            Self::clear_stale(&path).await;
            if Instant::now() >= deadline {
                return Err(StoreError::Locked(path));
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn try_create(path: &Path, content: &[u8]) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(content).await?;
        file.flush().await
    }

    /// Remove the lock when its holder is gone or it outlived [`LOCK_TIMEOUT`]
    async fn clear_stale(path: &Path) {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(_) => return,
        };

        let stale = match serde_json::from_slice::<LockInfo>(&content) {
            Ok(holder) => {
                let age = Utc::now().timestamp() - holder.timestamp;
                !is_process_running(holder.pid) || age >= LOCK_TIMEOUT.as_secs() as i64
            }
            // Holder may still be writing its pid
            Err(_) => lock_age(path).await.map_or(false, |age| age >= LOCK_TIMEOUT),
        };
        if !stale {
            return;
        }

        // Only remove the lock that was judged, not one taken over meanwhile
        if fs::read(path).await.ok().as_deref() == Some(content.as_slice()) {
            warn!("Removing stale store lock {}", path.display());
            let _ = fs::remove_file(path).await;
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn is_process_running(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

async fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).await.ok()?.modified().ok()?;
    modified.elapsed().ok()
}

/// One JSON file per enactment, laid out as `<dir>/<node>/<policy>.json`.
///
/// Writes go through a temporary file and a rename so readers never observe
/// a torn record. Read-check-write sequences hold a lock file in `dir`, so
/// several processes sharing the directory still get compare-and-swap
/// semantics.
pub struct FileEnactmentStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
    lock_wait: Duration,
}

impl FileEnactmentStore {
    /// Open a store rooted at `dir`, creating the directory when missing
    pub async fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
        }

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            lock_wait: DEFAULT_LOCK_WAIT,
        })
    }

    /// How long writers wait for another process to release the lock
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &EnactmentKey) -> StoreResult<PathBuf> {
        let valid = |part: &str| {
            !part.is_empty()
                && !part.starts_with('.')
                && !part.contains(['/', '\\', '\0'])
        };
        if !valid(&key.node) || !valid(&key.policy) {
            return Err(StoreError::InvalidKey(key.clone()));
        }
        Ok(self
            .dir
            .join(&key.node)
            .join(format!("{}.json", key.policy)))
    }

    /// Serialize writers in this process, then across processes
    async fn lock(&self) -> StoreResult<(tokio::sync::MutexGuard<'_, ()>, StoreLock)> {
        let local = self.write_lock.lock().await;
        let shared = StoreLock::acquire(&self.dir, self.lock_wait).await?;
        Ok((local, shared))
    }

    async fn read(&self, key: &EnactmentKey) -> StoreResult<Enactment> {
        let path = self.record_path(key)?;
        let enactment: Enactment = match fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        if enactment.key != *key {
            return Err(StoreError::KeyMismatch {
                requested: key.clone(),
                found: enactment.key,
            });
        }
        Ok(enactment)
    }

    async fn write(&self, enactment: &Enactment) -> StoreResult<()> {
        let path = self.record_path(&enactment.key)?;
        if let Some(node_dir) = path.parent() {
            fs::create_dir_all(node_dir).await?;
        }
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(enactment)?;

        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;
        debug!(
            "Stored enactment {} at version {}",
            enactment.key, enactment.resource_version
        );
        Ok(())
    }

    async fn read_node_dir(&self, node_dir: &Path, records: &mut Vec<Enactment>) -> StoreResult<()> {
        // The directory of a node may be removed by a concurrent delete
        let mut entries = match fs::read_dir(node_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            match fs::read(&path).await {
                Ok(data) => match serde_json::from_slice::<Enactment>(&data) {
                    Ok(enactment) => records.push(enactment),
                    Err(e) => warn!("Skipping unreadable enactment {}: {}", path.display(), e),
                },
                Err(e) => warn!("Failed to read enactment {}: {}", path.display(), e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EnactmentStore for FileEnactmentStore {
    async fn get(&self, key: &EnactmentKey) -> StoreResult<Enactment> {
        self.read(key).await
    }

    async fn create(&self, key: &EnactmentKey) -> StoreResult<Enactment> {
        let _guard = self.lock().await?;
        match self.read(key).await {
            Ok(_) => return Err(StoreError::AlreadyExists(key.clone())),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut enactment = Enactment::new(key.clone());
        enactment.resource_version = 1;
        self.write(&enactment).await?;
        Ok(enactment)
    }

    async fn update(&self, enactment: &Enactment) -> StoreResult<Enactment> {
        let _guard = self.lock().await?;
        let current = self.read(&enactment.key).await?;
        check_version(&current, enactment)?;

        let mut stored = enactment.clone();
        stored.resource_version = current.resource_version + 1;
        self.write(&stored).await?;
        Ok(stored)
    }

    async fn delete(&self, key: &EnactmentKey) -> StoreResult<()> {
        let _guard = self.lock().await?;
        let path = self.record_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.clone()))
            }
            Err(e) => return Err(e.into()),
        }

        // Fails while other policies of the node remain
        if let Some(node_dir) = path.parent() {
            let _ = fs::remove_dir(node_dir).await;
        }
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<Enactment>> {
        let mut records = Vec::new();
        let mut nodes = fs::read_dir(&self.dir).await?;

        while let Some(node) = nodes.next_entry().await? {
            if !node.file_type().await?.is_dir() {
                continue;
            }
            self.read_node_dir(&node.path(), &mut records).await?;
        }

        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}
