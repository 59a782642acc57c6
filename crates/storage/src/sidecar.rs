use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tenant_backup_core::naming::sidecar_path;
use tenant_backup_core::BackupRecord;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::backend::StorageBackend;
use crate::store::{newest_first, MetadataStore};
use crate::StorageError;

/// Catalog kept as one JSON array per tenant next to the tenant's backups.
///
/// Every read-modify-write holds the tenant's lock, so concurrent appends within this process
/// cannot drop each other's entries.
pub struct SidecarStore {
    storage: Arc<dyn StorageBackend>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SidecarStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn tenant_lock(&self, tenant: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(tenant.to_owned()).or_default().clone()
    }

    async fn load(&self, tenant: &str) -> Result<Vec<BackupRecord>, StorageError> {
        match self.storage.get_bytes(&sidecar_path(tenant)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(StorageError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, tenant: &str, records: &[BackupRecord]) -> Result<(), StorageError> {
        let raw = serde_json::to_vec_pretty(records)?;
        self.storage.put_bytes(&sidecar_path(tenant), &raw).await
    }
}

#[async_trait::async_trait]
impl MetadataStore for SidecarStore {
    async fn append(&self, tenant: &str, record: &BackupRecord) -> Result<(), StorageError> {
        let lock = self.tenant_lock(tenant);
        let _held = lock.lock().await;

        let mut records = self.load(tenant).await?;
        records.push(record.clone());
        self.save(tenant, &records).await?;
        debug!(tenant, filename = %record.filename, entries = records.len(), "catalog appended");
        Ok(())
    }

    async fn list(&self, tenant: &str) -> Result<Vec<BackupRecord>, StorageError> {
        let lock = self.tenant_lock(tenant);
        let _held = lock.lock().await;

        let mut records = self.load(tenant).await?;
        newest_first(&mut records);
        Ok(records)
    }

    async fn remove(&self, tenant: &str, filenames: &[String]) -> Result<usize, StorageError> {
        let lock = self.tenant_lock(tenant);
        let _held = lock.lock().await;

        let mut records = self.load(tenant).await?;
        let before = records.len();
        records.retain(|r| !filenames.contains(&r.filename));
        let removed = before - records.len();
        if removed > 0 {
            self.save(tenant, &records).await?;
        }
        Ok(removed)
    }
}
