//! Session persistence
//!
//! The chat session is persisted as three string entries in a key-value
//! store: the thread list, the active thread identifier and the selected
//! model. They are read once at startup and written after state changes.
//! Absence or parse failure of any entry falls back to defaults; storage
//! problems never abort the session.

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{Result, ThreadlineError};
use crate::thread::{Thread, ThreadStore};

pub mod memory;
pub mod sled_store;
pub mod sqlite;
pub mod types;

pub use memory::MemoryKeyValueStore;
pub use sled_store::SledKeyValueStore;
pub use sqlite::SqliteKeyValueStore;
pub use types::{SessionState, ACTIVE_THREAD_KEY, MODEL_KEY, THREADS_KEY};

/// String-keyed persistence collaborator
pub trait KeyValueStore: Send + Sync {
    /// Reads an entry; `Ok(None)` when the key is absent
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes an entry, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Opens the key-value store selected by configuration
///
/// Without an explicit path the store lives in the platform data directory.
///
/// # Errors
///
/// Returns `ThreadlineError::Storage` if the data directory cannot be
/// determined or the backend fails to open.
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn KeyValueStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Box::new(MemoryKeyValueStore::new())),
        StorageBackend::Sled => {
            let path = resolve_path(config, "session.sled")?;
            tracing::debug!(path = %path.display(), "Opening sled session store");
            Ok(Box::new(SledKeyValueStore::new(path)?))
        }
        StorageBackend::Sqlite => {
            let path = resolve_path(config, "session.db")?;
            tracing::debug!(path = %path.display(), "Opening SQLite session store");
            Ok(Box::new(SqliteKeyValueStore::new_with_path(path)?))
        }
    }
}

fn resolve_path(config: &StorageConfig, file_name: &str) -> Result<PathBuf> {
    if let Some(path) = &config.path {
        return Ok(path.clone());
    }

    let proj_dirs = ProjectDirs::from("com", "threadline", "threadline").ok_or_else(|| {
        ThreadlineError::Storage("Could not determine data directory".into())
    })?;

    let data_dir = proj_dirs.data_dir();
    std::fs::create_dir_all(data_dir)
        .map_err(|e| ThreadlineError::Storage(format!("Failed to create data directory: {}", e)))?;

    Ok(data_dir.join(file_name))
}

/// Reads and writes the session entries of a [`KeyValueStore`]
pub struct SessionPersistence {
    kv: Box<dyn KeyValueStore>,
}

impl SessionPersistence {
    pub fn new(kv: Box<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Persistence over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryKeyValueStore::new()))
    }

    /// Reads all three entries
    ///
    /// Never fails: an unreadable or unparseable entry is logged and
    /// reported as absent. An empty stored thread list counts as absent.
    pub fn load(&self) -> SessionState {
        let threads = self
            .read(THREADS_KEY)
            .and_then(|raw| match serde_json::from_str::<Vec<Thread>>(&raw) {
                Ok(threads) => Some(threads),
                Err(e) => {
                    tracing::warn!("Ignoring unparseable stored threads: {}", e);
                    None
                }
            })
            .filter(|threads| !threads.is_empty());

        SessionState {
            threads,
            active_thread_id: self.read(ACTIVE_THREAD_KEY).filter(|id| !id.is_empty()),
            model: self.read(MODEL_KEY).filter(|m| !m.is_empty()),
        }
    }

    /// Builds the startup thread store from persisted state and defaults
    pub fn load_store(&self, default_title: &str, default_model: &str) -> ThreadStore {
        let state = self.load();
        let model = state.model.unwrap_or_else(|| default_model.to_string());
        match state.threads {
            Some(threads) => {
                tracing::info!(count = threads.len(), "Restored stored threads");
                ThreadStore::new(threads, state.active_thread_id, model)
            }
            None => ThreadStore::with_empty_thread(default_title, model),
        }
    }

    pub fn save_threads(&self, threads: &[Thread]) -> Result<()> {
        let json = serde_json::to_string(threads)?;
        self.kv.set(THREADS_KEY, &json)
    }

    /// Writes the active pointer; an unset pointer is not written
    pub fn save_active(&self, thread_id: Option<&str>) -> Result<()> {
        match thread_id {
            Some(id) => self.kv.set(ACTIVE_THREAD_KEY, id),
            None => Ok(()),
        }
    }

    pub fn save_model(&self, model: &str) -> Result<()> {
        self.kv.set(MODEL_KEY, model)
    }

    /// Writes every entry from the store's current state
    pub fn save_all(&self, store: &ThreadStore) -> Result<()> {
        self.save_threads(store.threads())?;
        self.save_active(store.active_thread_id())?;
        self.save_model(store.selected_model())
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.kv.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", key, e);
                None
            }
        }
    }
}
