use async_trait::async_trait;
use bytes::Bytes;
use chrono::SecondsFormat;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use portal_config::S3Config;
use std::sync::Arc;
use tracing::debug;

use super::{validate_path, FileMetadata, FileStorage, StorageError};

/// Storage on top of an `object_store` backend, S3 in production.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    name: &'static str,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("backend", &self.name)
            .finish()
    }
}

impl ObjectStorage {
    pub fn s3(config: &S3Config) -> Result<Self, StorageError> {
        let bucket = config
            .bucket
            .as_deref()
            .filter(|bucket| !bucket.is_empty())
            .ok_or_else(|| StorageError::Backend("S3 bucket is not configured".to_string()))?;

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&config.region);
        if let Some(key) = &config.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }

        let store = builder.build().map_err(backend)?;
        Ok(Self {
            store: Arc::new(store),
            name: "s3",
        })
    }

    /// Process-local store, handy for tests and throwaway environments.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            name: "memory",
        }
    }

    fn location(path: &str) -> Result<ObjectPath, StorageError> {
        validate_path(path)?;
        ObjectPath::parse(path).map_err(|_| StorageError::InvalidPath(path.to_string()))
    }
}

fn backend(err: object_store::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn lookup(err: object_store::Error, path: &str) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
        other => backend(other),
    }
}

#[async_trait]
impl FileStorage for ObjectStorage {
    async fn store(&self, path: &str, content: Bytes) -> Result<FileMetadata, StorageError> {
        let location = Self::location(path)?;
        let size = content.len() as u64;
        self.store
            .put(&location, PutPayload::from(content))
            .await
            .map_err(backend)?;
        debug!(path, size, backend = self.name, "stored object");

        Ok(FileMetadata {
            path: path.to_string(),
            size,
            last_modified: None,
        })
    }

    async fn retrieve(&self, path: &str) -> Result<Bytes, StorageError> {
        let location = Self::location(path)?;
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|err| lookup(err, path))?;
        result.bytes().await.map_err(|err| lookup(err, path))
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let location = Self::location(path)?;
        match self.store.head(&location).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(err) => return Err(backend(err)),
        }
        self.store.delete(&location).await.map_err(backend)?;
        Ok(true)
    }

    async fn metadata(&self, path: &str) -> Result<FileMetadata, StorageError> {
        let location = Self::location(path)?;
        let meta = self
            .store
            .head(&location)
            .await
            .map_err(|err| lookup(err, path))?;

        Ok(FileMetadata {
            path: path.to_string(),
            size: meta.size as u64,
            last_modified: Some(meta.last_modified.to_rfc3339_opts(SecondsFormat::Secs, true)),
        })
    }

    fn backend_name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip() {
        let storage = ObjectStorage::in_memory();

        storage
            .store("contracts/c1/signature.png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        let meta = storage.metadata("contracts/c1/signature.png").await.unwrap();
        assert_eq!(meta.size, 3);
        assert!(meta.last_modified.is_some());

        assert!(storage.delete("contracts/c1/signature.png").await.unwrap());
        assert!(!storage.delete("contracts/c1/signature.png").await.unwrap());
        assert!(matches!(
            storage.metadata("contracts/c1/signature.png").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn s3_requires_a_bucket() {
        let err = ObjectStorage::s3(&S3Config::default()).unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }
}
