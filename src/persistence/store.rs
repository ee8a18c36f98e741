// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

/// Key-value checkpoint store.
///
/// Values are raw JSON so the stored file stays human-readable. Writes go to
/// an in-memory cache until [`Persister::sync`] is called.
pub trait Persister: Send {
    /// Get a raw JSON value
    fn get(&self, key: &str) -> Option<&Value>;

    /// Set a raw JSON value
    fn set(&mut self, key: &str, value: Value);

    /// Delete a key
    fn delete(&mut self, key: &str);

    /// Load data from the underlying storage into the cache
    fn load(&mut self) -> Result<()>;

    /// Sync the cache to the underlying storage
    fn sync(&self) -> Result<()>;
}

/// Typed access on top of [`Persister`].
pub trait PersisterExt: Persister {
    fn set_raw_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let json_value = serde_json::to_value(value)?;
        self.set(key, json_value);
        Ok(())
    }

    /// Returns Ok(None) if the key doesn't exist and Err if it exists but
    /// does not deserialize.
    fn try_get_raw_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
        }
    }
}

impl<P: Persister + ?Sized> PersisterExt for P {}

/// Persister that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryPersister {
    data: HashMap<String, Value>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persister for MemoryPersister {
    fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) {
        self.data.remove(key);
    }

    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
