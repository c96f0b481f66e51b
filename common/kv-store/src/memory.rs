use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Client, StorageError};

/// Process-local storage, for hosts that persist somewhere else or not at all.
#[derive(Clone, Default)]
pub struct MemoryClient {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Synchronous peek used by tests to compare raw persisted bytes.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock_values().get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.lock_values().insert(key.to_owned(), value.to_owned());
    }
}

#[async_trait]
impl Client for MemoryClient {
    async fn get(&self, key: String) -> Result<Option<String>, StorageError> {
        Ok(self.lock_values().get(&key).cloned())
    }

    async fn set(&self, key: String, value: String) -> Result<(), StorageError> {
        self.lock_values().insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: String) -> Result<(), StorageError> {
        self.lock_values().remove(&key);
        Ok(())
    }
}
