//! Blob storage for uploaded files.
//!
//! Objects are addressed by a relative path such as
//! `projects/<project_id>/<uuid>.pdf`. Two backends exist: the local upload
//! directory and S3 (or anything else `object_store` can talk to).

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

mod local;
mod object;

pub use local::LocalStorage;
pub use object::ObjectStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid file path: {0}")]
    InvalidPath(String),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Size and modification time of a stored object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMetadata {
    pub path: String,
    pub size: u64,
    pub last_modified: Option<String>,
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn store(&self, path: &str, content: Bytes) -> Result<FileMetadata, StorageError>;

    async fn retrieve(&self, path: &str) -> Result<Bytes, StorageError>;

    /// Returns false when nothing was stored under `path`.
    async fn delete(&self, path: &str) -> Result<bool, StorageError>;

    async fn metadata(&self, path: &str) -> Result<FileMetadata, StorageError>;

    fn backend_name(&self) -> &'static str;
}

/// Reject absolute paths, parent references and empty segments.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    let invalid = || StorageError::InvalidPath(path.to_string());

    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains('\0') {
        return Err(invalid());
    }

    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains(':') {
            return Err(invalid());
        }
    }

    Ok(())
}
