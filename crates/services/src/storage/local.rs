use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{validate_path, FileMetadata, FileStorage, StorageError};

/// Files kept below a directory on the local disk.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    async fn describe(&self, path: &str, full: &Path) -> Result<FileMetadata, StorageError> {
        let meta = fs::metadata(full).await.map_err(|err| not_found(err, path))?;
        let last_modified = meta.modified().ok().map(|time| {
            DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
        });

        Ok(FileMetadata {
            path: path.to_string(),
            size: meta.len(),
            last_modified,
        })
    }
}

fn not_found(err: std::io::Error, path: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, path: &str, content: Bytes) -> Result<FileMetadata, StorageError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, &content).await?;
        debug!(path, size = content.len(), "stored file on local disk");
        self.describe(path, &full).await
    }

    async fn retrieve(&self, path: &str) -> Result<Bytes, StorageError> {
        let full = self.resolve(path)?;
        let content = fs::read(&full).await.map_err(|err| not_found(err, path))?;
        Ok(Bytes::from(content))
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn metadata(&self, path: &str) -> Result<FileMetadata, StorageError> {
        let full = self.resolve(path)?;
        self.describe(path, &full).await
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
