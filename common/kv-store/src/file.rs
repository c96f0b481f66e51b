use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::{Client, StorageError};

const TEMP_SUFFIX: &str = ".tmp";

/// Stores each key as a file under `root`.
///
/// Writes go to a sibling temp file which is then renamed over the target. Rename is atomic
/// on the same filesystem, so a crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileClient {
    root: PathBuf,
}

impl FileClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        // ':' is not portable in file names
        Ok(self.root.join(key.replace(':', "_")))
    }
}

#[async_trait]
impl Client for FileClient {
    async fn get(&self, key: String) -> Result<Option<String>, StorageError> {
        let path = self.path_for(&key)?;
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                tracing::warn!("failed to read {}: {}", path.display(), e);
                Err(e.into())
            }
        }
    }

    async fn set(&self, key: String, value: String) -> Result<(), StorageError> {
        let path = self.path_for(&key)?;
        fs::create_dir_all(&self.root).await?;

        let mut temp_name = path.clone().into_os_string();
        temp_name.push(TEMP_SUFFIX);
        let temp_path = PathBuf::from(temp_name);

        fs::write(&temp_path, value.as_bytes()).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            tracing::warn!("failed to move {} into place: {}", temp_path.display(), e);
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                tracing::debug!("could not remove {}: {}", temp_path.display(), cleanup);
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: String) -> Result<(), StorageError> {
        let path = self.path_for(&key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
