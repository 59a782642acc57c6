use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tenant_backup_core::naming::{backup_filename, object_path, with_suffix};
use tenant_backup_core::{
    file_checksum, BackupKind, BackupMethod, BackupRecord, DatabaseConnectionInfo, NewBackupRecord,
    Tenant,
};
use tenant_backup_dump::{compress, AvailableMethods, Dialect, ExportOptions, ExternalExporter, NativeExporter};
use tenant_backup_storage::StorageError;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const UPLOAD_ATTEMPTS: u32 = 5;

use crate::services::Services;
use crate::temp::scratch_file;
use crate::tenancy::TenantScope;
use crate::BackupError;

#[derive(Debug, Clone, Copy)]
pub struct BackupOptions {
    /// `None` picks the recommended method.
    pub method: Option<BackupMethod>,
    pub compress: bool,
    pub structure_only: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            method: None,
            compress: true,
            structure_only: false,
        }
    }
}

pub struct BackupOrchestrator {
    services: Arc<Services>,
    available: AvailableMethods,
}

impl BackupOrchestrator {
    pub fn new(services: Arc<Services>, available: AvailableMethods) -> Self {
        Self {
            services,
            available,
        }
    }

    /// Checks the configured tools and driver support, then builds an orchestrator over what was found.
    pub async fn detect(services: Arc<Services>) -> Self {
        let available = services.detect_methods().await;
        Self::new(services, available)
    }

    pub fn available(&self) -> AvailableMethods {
        self.available
    }

    pub async fn create_backup(
        &self,
        tenant: &Tenant,
        options: BackupOptions,
    ) -> Result<BackupRecord, BackupError> {
        let method = options
            .method
            .unwrap_or_else(|| self.available.recommended());
        if !self.available.contains(method) {
            return Err(BackupError::UnsupportedMethod(method));
        }

        match self.run(tenant, method, options).await {
            Ok(record) => {
                info!(
                    tenant = %tenant.id,
                    method = %method,
                    filename = %record.filename,
                    size_bytes = record.size_bytes,
                    "backup created"
                );
                Ok(record)
            }
            Err(e) => {
                error!(tenant = %tenant.id, method = %method, error = %e, "backup failed");
                Err(BackupError::BackupFailed {
                    tenant: tenant.id.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Backs up every tenant, at most `concurrency` at a time. Results are ordered by tenant id.
    pub async fn create_backups(
        self: &Arc<Self>,
        tenants: Vec<Tenant>,
        options: BackupOptions,
        concurrency: usize,
    ) -> Vec<(String, Result<BackupRecord, BackupError>)> {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut owners = HashMap::new();

        for tenant in tenants {
            let this = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let id = tenant.id.clone();
            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                this.create_backup(&tenant, options).await
            });
            owners.insert(handle.id(), id);
        }

        let mut results = Vec::with_capacity(owners.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((task, result)) => {
                    if let Some(id) = owners.remove(&task) {
                        results.push((id, result));
                    }
                }
                Err(e) => {
                    if let Some(id) = owners.remove(&e.id()) {
                        results.push((id, Err(BackupError::Task(e))));
                    }
                }
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    async fn run(
        &self,
        tenant: &Tenant,
        method: BackupMethod,
        options: BackupOptions,
    ) -> Result<BackupRecord, BackupError> {
        let scope = TenantScope::enter(self.services.tenants.clone(), tenant)?;
        let info = scope.info();
        let kind = BackupKind::from_structure_only(options.structure_only);
        let created_at = Utc::now();

        let temp = scratch_file(&self.services.settings.temp_dir, "dump.sql")?;
        self.export(method, info, options.structure_only, &temp)
            .await?;

        if options.compress {
            let path = temp.to_path_buf();
            tokio::task::spawn_blocking(move || compress::encode(&path))
                .await?
                .map_err(BackupError::Compression)?;
        }

        let path = temp.to_path_buf();
        let (checksum, size_bytes) = tokio::task::spawn_blocking(move || file_checksum(&path)).await??;

        let base = backup_filename(
            &info.database,
            tenant.primary_domain(),
            created_at,
            kind,
            method,
            options.compress,
        );
        let (filename, key) = self.upload(&tenant.id, &base, &temp).await?;
        drop(temp);

        let record = NewBackupRecord {
            filename,
            path: key.clone(),
            size_bytes,
            kind,
            method,
            compressed: options.compress,
            checksum: Some(checksum),
            created_at,
        }
        .into_record();

        if let Err(e) = self.services.catalog.append(&tenant.id, &record).await {
            if let Err(cleanup) = self.services.storage.delete(&key).await {
                warn!(path = %key, error = %cleanup, "failed to remove uncataloged backup");
            }
            return Err(e.into());
        }
        Ok(record)
    }

    /// Stores the dump under `base`, or under `base` plus a random suffix when that key is taken.
    async fn upload(
        &self,
        tenant: &str,
        base: &str,
        source: &Path,
    ) -> Result<(String, String), BackupError> {
        let mut filename = base.to_owned();
        let mut attempt = 1;
        loop {
            let key = object_path(tenant, &filename);
            match self.services.storage.put_file_new(&key, source).await {
                Ok(_) => return Ok((filename, key)),
                Err(StorageError::AlreadyExists(_)) if attempt < UPLOAD_ATTEMPTS => {
                    debug!(tenant, key = %key, "backup name taken, adding suffix");
                    let suffix = Uuid::new_v4().simple().to_string();
                    filename = with_suffix(base, &suffix[..8]);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn export(
        &self,
        method: BackupMethod,
        info: &DatabaseConnectionInfo,
        structure_only: bool,
        dest: &Path,
    ) -> Result<(), BackupError> {
        let Some(dialect) = Dialect::for_method(method) else {
            return ExternalExporter::new(
                self.services.runner.clone(),
                &self.services.tools.dump,
                self.services.settings.tool_timeout,
            )
            .export(info, structure_only, dest)
            .await
            .map_err(BackupError::Export);
        };

        let server = self.services.server.clone();
        let info = info.clone();
        let dest = dest.to_owned();
        let options = ExportOptions {
            structure_only,
            rows_per_insert: self.services.settings.rows_per_insert,
        };
        let summary = tokio::task::spawn_blocking(move || {
            let conn = server.connect(&info)?;
            NativeExporter::new(dialect).export_to_file(conn.as_ref(), &info, options, &dest)
        })
        .await?
        .map_err(BackupError::Export)?;
        debug!(tables = summary.tables, rows = summary.rows, "native export written");
        Ok(())
    }
}
