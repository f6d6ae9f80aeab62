//! State store for applied resources
//!
//! Manages the `.terraflow/state.json` file which records, per resource
//! address, the attributes last reported by its adapter.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use terraflow_core::{ResourceAddress, STATE_VERSION, StateEntry, StateSnapshot};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const STATE_DIR: &str = ".terraflow";
const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "lock.json";
const LOCK_ATTEMPTS: usize = 3;

/// Durable record of last-applied resources
///
/// Every mutation touches a single address and is durable when the call
/// returns.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Full snapshot, read at plan start
    async fn snapshot(&self) -> Result<StateSnapshot>;

    async fn get(&self, address: &ResourceAddress) -> Result<Option<StateEntry>> {
        Ok(self.snapshot().await?.get(address).cloned())
    }

    /// Insert or replace one entry
    async fn upsert(&self, address: &ResourceAddress, entry: StateEntry) -> Result<()>;

    /// Remove one entry
    async fn remove(&self, address: &ResourceAddress) -> Result<Option<StateEntry>>;

    /// Acquire exclusive access for a run, if the store supports locking
    async fn acquire_lock(&self) -> Result<Option<StateLock>> {
        Ok(None)
    }
}

/// JSON state file with atomic replacement
pub struct FileStateStore {
    path: PathBuf,
    cache: Mutex<Option<StateSnapshot>>,
}

impl FileStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: Mutex::new(None),
        }
    }

    /// Store at `<project_root>/.terraflow/state.json`
    pub fn in_project(project_root: impl AsRef<Path>) -> Self {
        Self::new(project_root.as_ref().join(STATE_DIR).join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".backup");
        PathBuf::from(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    fn state_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ensure the state directory exists
    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the state file from disk
    async fn load(&self) -> Result<StateSnapshot> {
        if !self.path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(StateSnapshot::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let state: StateSnapshot = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!(
            resources = state.len(),
            serial = state.serial,
            "Loaded state"
        );
        Ok(state)
    }

    /// Write the snapshot: temp file, keep the previous file as backup,
    /// then rename into place
    async fn save(&self, state: &StateSnapshot) -> Result<()> {
        self.ensure_state_dir().await?;

        let content = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        fs::write(&temp, content).await?;

        if self.path.exists() {
            fs::copy(&self.path, self.backup_path()).await?;
        }
        fs::rename(&temp, &self.path).await?;

        tracing::debug!(
            resources = state.len(),
            serial = state.serial,
            "Saved state"
        );
        Ok(())
    }

    /// Apply one mutation to the cached snapshot and persist it
    async fn mutate<T>(&self, change: impl FnOnce(&mut StateSnapshot) -> T) -> Result<T> {
        let mut cache = self.cache.lock().await;
        let state = match cache.take() {
            Some(state) => state,
            None => self.load().await?,
        };

        let mut next = state.clone();
        let result = change(&mut next);
        next.serial += 1;

        match self.save(&next).await {
            Ok(()) => {
                *cache = Some(next);
                Ok(result)
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to persist state");
                *cache = Some(state);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn snapshot(&self) -> Result<StateSnapshot> {
        let mut cache = self.cache.lock().await;
        let state = self.load().await?;
        *cache = Some(state.clone());
        Ok(state)
    }

    async fn upsert(&self, address: &ResourceAddress, entry: StateEntry) -> Result<()> {
        tracing::debug!(address = %address, id = %entry.id, "Recording state entry");
        let address = address.clone();
        self.mutate(move |state| state.upsert(address, entry)).await
    }

    async fn remove(&self, address: &ResourceAddress) -> Result<Option<StateEntry>> {
        tracing::debug!(address = %address, "Removing state entry");
        self.mutate(|state| state.remove(address)).await
    }

    /// Acquire a lock for exclusive access
    ///
    /// The lock file is created with `create_new`, so only one caller can
    /// win. A lock older than one hour is removed and the creation retried.
    async fn acquire_lock(&self) -> Result<Option<StateLock>> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();
        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&lock_info)?;

        for _ in 0..LOCK_ATTEMPTS {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(content.as_bytes()).await?;
                    file.flush().await?;
                    tracing::debug!("Acquired state lock");
                    return Ok(Some(StateLock {
                        lock_path,
                        released: false,
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let content = match fs::read_to_string(&lock_path).await {
                Ok(content) => content,
                // Released in between
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            // An unreadable lock is one still being written
            let Ok(existing) = serde_json::from_str::<LockInfo>(&content) else {
                return Err(CloudError::LockError(
                    "State is being locked by another process".to_string(),
                ));
            };

            // Check if lock is stale (older than 1 hour)
            let age = Utc::now().signed_duration_since(existing.acquired_at);
            if age.num_hours() < 1 {
                return Err(CloudError::LockError(format!(
                    "State is locked by {} (pid {}) since {}",
                    existing.holder, existing.pid, existing.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", existing.holder);
            match fs::remove_file(&lock_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Err(CloudError::LockError(
            "Could not acquire the state lock".to_string(),
        ))
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    #[serde(default)]
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for state lock
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

/// In-memory store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<StateSnapshot>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn snapshot(&self) -> Result<StateSnapshot> {
        Ok(self.state.lock().await.clone())
    }

    async fn get(&self, address: &ResourceAddress) -> Result<Option<StateEntry>> {
        Ok(self.state.lock().await.get(address).cloned())
    }

    async fn upsert(&self, address: &ResourceAddress, entry: StateEntry) -> Result<()> {
        let mut state = self.state.lock().await;
        state.upsert(address.clone(), entry);
        state.serial += 1;
        Ok(())
    }

    async fn remove(&self, address: &ResourceAddress) -> Result<Option<StateEntry>> {
        let mut state = self.state.lock().await;
        let removed = state.remove(address);
        state.serial += 1;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use terraflow_core::{Attributes, ResourceObject};

    fn entry(id: &str) -> StateEntry {
        StateEntry::new(
            "local_file",
            ResourceObject::new(id, Attributes::from([("content".into(), json!("hi"))])),
        )
    }

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::in_project(temp_dir.path());
        let address = ResourceAddress::new("local_file", "motd");

        store.upsert(&address, entry("/tmp/motd")).await.unwrap();

        let reopened = FileStateStore::in_project(temp_dir.path());
        let loaded = reopened.snapshot().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.serial, 1);
        assert_eq!(loaded.get(&address).unwrap().id, "/tmp/motd");
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::in_project(temp_dir.path());

        let state = store.snapshot().await.unwrap();
        assert!(state.is_empty());
        assert_eq!(state.serial, 0);
    }

    #[tokio::test]
    async fn test_every_mutation_bumps_serial_and_keeps_backup() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::in_project(temp_dir.path());
        let a = ResourceAddress::new("local_file", "a");
        let b = ResourceAddress::new("local_file", "b");

        store.upsert(&a, entry("a")).await.unwrap();
        store.upsert(&b, entry("b")).await.unwrap();
        let removed = store.remove(&a).await.unwrap();

        assert_eq!(removed.unwrap().id, "a");
        let state = store.snapshot().await.unwrap();
        assert_eq!(state.serial, 3);
        assert!(!state.contains(&a));

        let backup = std::fs::read_to_string(temp_dir.path().join(".terraflow/state.json.backup"))
            .unwrap();
        let previous: StateSnapshot = serde_json::from_str(&backup).unwrap();
        assert_eq!(previous.serial, 2);
        assert!(previous.contains(&a));
        assert!(!temp_dir.path().join(".terraflow/state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_newer_version_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::in_project(temp_dir.path());
        let mut state = StateSnapshot::new();
        state.version = STATE_VERSION + 1;
        std::fs::create_dir_all(temp_dir.path().join(".terraflow")).unwrap();
        std::fs::write(store.path(), serde_json::to_string(&state).unwrap()).unwrap();

        let err = store.snapshot().await.unwrap_err();
        assert!(matches!(err, CloudError::StateError(_)));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::in_project(temp_dir.path());

        let lock = store.acquire_lock().await.unwrap().unwrap();
        let err = store.acquire_lock().await.unwrap_err();
        assert!(matches!(err, CloudError::LockError(_)));

        lock.release().await.unwrap();
        let again = store.acquire_lock().await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_memory_store_has_no_lock() {
        let store = MemoryStateStore::new();
        assert!(store.acquire_lock().await.unwrap().is_none());
        store
            .upsert(&ResourceAddress::new("local_file", "a"), entry("a"))
            .await
            .unwrap();
        assert_eq!(store.snapshot().await.unwrap().serial, 1);
    }

    #[tokio::test]
    async fn test_concurrent_lock_has_one_winner() {
        let temp_dir = tempdir().unwrap();
        let first = FileStateStore::in_project(temp_dir.path());
        let second = FileStateStore::in_project(temp_dir.path());

        for _ in 0..20 {
            let (a, b) = tokio::join!(first.acquire_lock(), second.acquire_lock());
            let (winner, loser) = match (a, b) {
                (Ok(Some(lock)), Err(err)) | (Err(err), Ok(Some(lock))) => (lock, err),
                other => panic!("expected exactly one holder, got {:?}", other),
            };
            assert!(matches!(loser, CloudError::LockError(_)));
            winner.release().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::in_project(temp_dir.path());
        store.ensure_state_dir().await.unwrap();
        let stale = LockInfo {
            holder: "old-host".to_string(),
            pid: 1,
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        std::fs::write(store.lock_path(), serde_json::to_string(&stale).unwrap()).unwrap();

        let lock = store.acquire_lock().await.unwrap();
        assert!(lock.is_some());
        let content = std::fs::read_to_string(store.lock_path()).unwrap();
        assert!(!content.contains("old-host"));
    }
}
