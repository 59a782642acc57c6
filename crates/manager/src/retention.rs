use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tenant_backup_core::naming::{sidecar_path, tenant_prefix};
use tenant_backup_core::Tenant;
use tracing::{info, warn};

use crate::services::Services;
use crate::BackupError;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TenantCleanup {
    pub tenant: String,
    /// Storage keys of the deleted objects.
    pub deleted: Vec<String>,
    pub pruned_records: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    /// Only tenants that had something expire.
    pub tenants: Vec<TenantCleanup>,
}

impl CleanupReport {
    pub fn deleted_count(&self) -> usize {
        self.tenants.iter().map(|t| t.deleted.len()).sum()
    }
}

/// Age-based deletion of stored backups.
pub struct RetentionSweeper {
    services: Arc<Services>,
}

impl RetentionSweeper {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn cleanup_older_than(
        &self,
        tenants: &[Tenant],
        days: i64,
    ) -> Result<CleanupReport, BackupError> {
        self.cleanup_at(tenants, days, Utc::now()).await
    }

    pub async fn cleanup_at(
        &self,
        tenants: &[Tenant],
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport, BackupError> {
        if days <= 0 {
            return Err(BackupError::InvalidRetention(days));
        }
        let cutoff = now - Duration::days(days);

        let mut report = CleanupReport::default();
        for tenant in tenants {
            let mut deleted = Vec::new();
            let swept = self.expire(tenant, cutoff, &mut deleted).await;
            if deleted.is_empty() {
                swept?;
                continue;
            }

            // Objects already gone must leave the catalog even when a later delete failed.
            let pruned = self.prune(tenant, &deleted).await;
            let pruned_records = match (swept, pruned) {
                (Ok(()), Ok(n)) => n,
                (Ok(()), Err(e)) => return Err(e),
                (Err(e), Ok(n)) => {
                    warn!(
                        tenant = %tenant.id,
                        removed = deleted.len(),
                        pruned_records = n,
                        error = %e,
                        "retention stopped early"
                    );
                    return Err(e);
                }
                (Err(e), Err(catalog)) => {
                    warn!(tenant = %tenant.id, error = %catalog, "catalog prune after partial cleanup failed");
                    return Err(e);
                }
            };
            info!(
                tenant = %tenant.id,
                removed = deleted.len(),
                pruned_records,
                retention_days = days,
                "retention removed old backups"
            );
            report.tenants.push(TenantCleanup {
                tenant: tenant.id.clone(),
                deleted,
                pruned_records,
            });
        }
        Ok(report)
    }

    /// Deletes expired objects, recording each key in `deleted` as soon as it is gone.
    async fn expire(
        &self,
        tenant: &Tenant,
        cutoff: DateTime<Utc>,
        deleted: &mut Vec<String>,
    ) -> Result<(), BackupError> {
        let storage = &self.services.storage;
        let sidecar = sidecar_path(&tenant.id);
        for key in storage.list(&tenant_prefix(&tenant.id)).await? {
            if key == sidecar {
                continue;
            }
            if storage.last_modified(&key).await? < cutoff {
                storage.delete(&key).await?;
                deleted.push(key);
            }
        }
        Ok(())
    }

    async fn prune(&self, tenant: &Tenant, deleted: &[String]) -> Result<usize, BackupError> {
        let filenames: Vec<String> = deleted
            .iter()
            .filter_map(|key| key.rsplit('/').next())
            .map(str::to_owned)
            .collect();
        Ok(self.services.catalog.remove(&tenant.id, &filenames).await?)
    }
}
