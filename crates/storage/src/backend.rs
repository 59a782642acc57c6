use std::path::Path;

use chrono::{DateTime, Utc};

use crate::StorageError;

/// Path-keyed object store holding backup archives and catalog sidecars.
///
/// Keys are `/`-separated relative paths such as `backups/acme/backups.json`.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Upload a local file; returns the stored size.
    async fn put_file(&self, key: &str, source: &Path) -> Result<u64, StorageError>;

    /// Like [`put_file`](Self::put_file) but never replaces an existing object; an occupied key
    /// fails with [`StorageError::AlreadyExists`].
    async fn put_file_new(&self, key: &str, source: &Path) -> Result<u64, StorageError>;

    async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Download an object into a local file; returns the byte count.
    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<u64, StorageError>;

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn size(&self, key: &str) -> Result<u64, StorageError>;

    async fn last_modified(&self, key: &str) -> Result<DateTime<Utc>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Every object key below `prefix`, sorted. A missing prefix lists as empty.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn make_directory(&self, key: &str) -> Result<(), StorageError>;
}
