use tenant_backup_core::BackupRecord;

use crate::StorageError;

/// Per-tenant catalog of backup records, implemented by the JSON sidecar and SQLite backends.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Append one record to the tenant's catalog.
    async fn append(&self, tenant: &str, record: &BackupRecord) -> Result<(), StorageError>;

    /// All records of a tenant ordered by created_at DESC; empty when there is no catalog yet.
    async fn list(&self, tenant: &str) -> Result<Vec<BackupRecord>, StorageError>;

    /// Delete the entries whose filename appears in `filenames`, returning how many went away.
    async fn remove(&self, tenant: &str, filenames: &[String]) -> Result<usize, StorageError>;

    async fn find(&self, tenant: &str, filename: &str) -> Result<Option<BackupRecord>, StorageError> {
        Ok(self
            .list(tenant)
            .await?
            .into_iter()
            .find(|r| r.filename == filename))
    }
}

/// Newest first; records sharing a timestamp keep reverse append order.
pub(crate) fn newest_first(records: &mut [BackupRecord]) {
    records.reverse();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
