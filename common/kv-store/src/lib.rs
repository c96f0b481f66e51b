//! A minimal durable key-value interface.
//!
//! Values are opaque strings stored under a single string key. Every write and delete is
//! atomic from the caller's point of view: a reader observes either the previous value or
//! the new one, never a mix of both.

use async_trait::async_trait;
use thiserror::Error;

mod file;
mod memory;
mod mock;

pub use file::FileClient;
pub use memory::MemoryClient;
pub use mock::{MockCall, MockClient};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

#[async_trait]
pub trait Client {
    /// Returns `Ok(None)` when nothing is stored under `key`.
    async fn get(&self, key: String) -> Result<Option<String>, StorageError>;

    /// Replaces whatever is stored under `key`.
    async fn set(&self, key: String, value: String) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: String) -> Result<(), StorageError>;
}
