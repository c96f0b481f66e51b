use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{Client, MemoryClient, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub op: String,
    pub key: String,
}

/// In-memory store that records calls and can be told to fail specific operations.
#[derive(Clone, Default)]
pub struct MockClient {
    inner: MemoryClient,
    get_err: HashMap<String, StorageError>,
    set_err: HashMap<String, StorageError>,
    remove_err: HashMap<String, StorageError>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    // Helper method to safely lock the calls mutex
    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<MockCall>> {
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, op: &str, key: &str) {
        self.lock_calls().push(MockCall {
            op: op.to_string(),
            key: key.to_string(),
        });
    }

    pub fn get_err(&mut self, key: &str, err: StorageError) -> Self {
        self.get_err.insert(key.to_owned(), err);
        self.clone()
    }

    pub fn set_err(&mut self, key: &str, err: StorageError) -> Self {
        self.set_err.insert(key.to_owned(), err);
        self.clone()
    }

    pub fn remove_err(&mut self, key: &str, err: StorageError) -> Self {
        self.remove_err.insert(key.to_owned(), err);
        self.clone()
    }

    pub fn with_value(self, key: &str, value: &str) -> Self {
        self.inner.insert_raw(key, value);
        self
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.inner.raw(key)
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.lock_calls().clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        self.lock_calls().iter().filter(|c| c.op == op).count()
    }
}

#[async_trait]
impl Client for MockClient {
    async fn get(&self, key: String) -> Result<Option<String>, StorageError> {
        self.record("get", &key);
        if let Some(err) = self.get_err.get(&key) {
            return Err(err.clone());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: String, value: String) -> Result<(), StorageError> {
        self.record("set", &key);
        if let Some(err) = self.set_err.get(&key) {
            return Err(err.clone());
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: String) -> Result<(), StorageError> {
        self.record("remove", &key);
        if let Some(err) = self.remove_err.get(&key) {
            return Err(err.clone());
        }
        self.inner.remove(key).await
    }
}
