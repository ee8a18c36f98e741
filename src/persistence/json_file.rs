// SPDX-License-Identifier: Apache-2.0

//! JSON file-based persistence with atomic writes.
//!
//! State for all scopes lives in one JSON document. Writes are atomic using a
//! write-to-temp-then-rename strategy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::store::Persister;
use crate::error::{Error, Result};

/// State stored in the JSON file
#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseState {
    scopes: HashMap<String, HashMap<String, Value>>,
}

/// A shared JSON file database handle
#[derive(Clone)]
pub struct JsonFileDatabase {
    path: PathBuf,
    state: Arc<RwLock<DatabaseState>>,
}

impl JsonFileDatabase {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let file = File::open(&path)
                .map_err(|e| Error::Persistence(format!("failed to open database: {}", e)))?;
            serde_json::from_reader(BufReader::new(file))
                .map_err(|e| Error::Persistence(format!("failed to parse database: {}", e)))?
        } else {
            DatabaseState::default()
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Create an in-memory database
    pub fn open_memory() -> Self {
        Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(DatabaseState::default())),
        }
    }

    /// Create a persister scoped to one consumer
    pub fn persister(&self, scope: impl Into<String>) -> JsonFilePersister {
        JsonFilePersister {
            path: self.path.clone(),
            state: self.state.clone(),
            scope: scope.into(),
            cache: HashMap::new(),
        }
    }
}

/// A persister backed by a JSON file, scoped to a particular consumer.
pub struct JsonFilePersister {
    path: PathBuf,
    state: Arc<RwLock<DatabaseState>>,
    scope: String,
    cache: HashMap<String, Value>,
}

impl Persister for JsonFilePersister {
    fn get(&self, key: &str) -> Option<&Value> {
        self.cache.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.cache.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) {
        self.cache.remove(key);
    }

    fn load(&mut self) -> Result<()> {
        let state = self
            .state
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        self.cache = state.scopes.get(&self.scope).cloned().unwrap_or_default();
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        {
            let mut state = self
                .state
                .write()
                .map_err(|e| Error::Persistence(e.to_string()))?;
            state.scopes.insert(self.scope.clone(), self.cache.clone());
        }

        // In-memory mode
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }

        let state = self
            .state
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        atomic_write(&self.path, &state)
    }
}

/// Write state to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, state: &DatabaseState) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Process ID plus counter keeps concurrent writers off each other's temp file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Persistence(format!("failed to write database: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush database: {}", e)))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| Error::Persistence(format!("failed to sync database: {}", e)))?;
    drop(writer);

    fs::rename(&temp_path, path)
        .map_err(|e| Error::Persistence(format!("failed to rename database file: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersisterExt;

    #[test]
    fn test_sync_and_load_memory() {
        let db = JsonFileDatabase::open_memory();

        {
            let mut persister = db.persister("consumer");
            persister.set_raw_json("key1", &"value1").unwrap();
            persister.set_raw_json("key2", &serde_json::json!({"offset": 7})).unwrap();
            persister.sync().unwrap();
        }

        let mut persister = db.persister("consumer");
        assert!(persister.get("key1").is_none());
        persister.load().unwrap();
        assert_eq!(
            persister.try_get_raw_json::<String>("key1").unwrap(),
            Some("value1".to_string())
        );
        assert_eq!(persister.get("key2").unwrap()["offset"], 7);
    }

    #[test]
    fn test_scopes_are_isolated() {
        let db = JsonFileDatabase::open_memory();

        let mut first = db.persister("scope1");
        let mut second = db.persister("scope2");
        first.set_raw_json("key", &"value1").unwrap();
        second.set_raw_json("key", &"value2").unwrap();
        first.sync().unwrap();
        second.sync().unwrap();

        let mut reloaded = db.persister("scope1");
        reloaded.load().unwrap();
        assert_eq!(
            reloaded.try_get_raw_json::<String>("key").unwrap(),
            Some("value1".to_string())
        );
    }

    #[test]
    fn test_file_roundtrip_and_no_temp_left() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("state").join("offsets.json");

        {
            let db = JsonFileDatabase::open(&db_path).unwrap();
            let mut persister = db.persister("consumer");
            persister.set_raw_json("offset", &12345u64).unwrap();
            persister.sync().unwrap();
        }

        let db = JsonFileDatabase::open(&db_path).unwrap();
        let mut persister = db.persister("consumer");
        persister.load().unwrap();
        assert_eq!(persister.try_get_raw_json::<u64>("offset").unwrap(), Some(12345));

        let entries: Vec<_> = fs::read_dir(db_path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("offsets.json")]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("offsets.json");
        fs::write(&db_path, "{not json").unwrap();

        assert!(matches!(
            JsonFileDatabase::open(&db_path),
            Err(Error::Persistence(_))
        ));
    }
}
