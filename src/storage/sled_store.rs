//! Embedded key-value store backed by `sled`

use std::path::Path;

use sled::Db;

use crate::error::{Result, ThreadlineError};
use crate::storage::KeyValueStore;

/// Persistent key-value store using an embedded `sled` database
pub struct SledKeyValueStore {
    db: Db,
}

impl SledKeyValueStore {
    /// Open or create a store at `path`
    ///
    /// # Errors
    ///
    /// Returns `ThreadlineError::Storage` if the database cannot be opened
    ///
    /// # Examples
    ///
    /// ```
    /// use threadline::storage::SledKeyValueStore;
    ///
    /// # fn main() -> threadline::error::Result<()> {
    /// let dir = tempfile::tempdir()?;
    /// let store = SledKeyValueStore::new(dir.path().join("session.sled"))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| ThreadlineError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }
}

impl KeyValueStore for SledKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self
            .db
            .get(key.as_bytes())
            .map_err(|e| ThreadlineError::Storage(format!("Get failed: {}", e)))?
        {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    ThreadlineError::Storage(format!("Value for {} is not UTF-8: {}", key, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| ThreadlineError::Storage(format!("Insert failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| ThreadlineError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }
}
