use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tenant_backup_core::naming::tenant_prefix;
use tenant_backup_core::{file_checksum, BackupMethod, BackupRecord, DatabaseConnectionInfo, RestoreStats, Tenant};
use tenant_backup_dump::{
    collect_stats, compress, replay_file, AvailableMethods, ExternalRestorer, Flavor,
};
use tracing::{info, warn};

use crate::backup::{BackupOptions, BackupOrchestrator};
use crate::services::Services;
use crate::temp::scratch_file;
use crate::tenancy::TenantScope;
use crate::BackupError;

/// How a fetched dump gets back into the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loader {
    /// Parsed and replayed through the in-process connector.
    Replay,
    /// Piped into the configured client binary.
    Client,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Take a full backup of the current database before it is dropped.
    pub safety_backup: bool,
}

pub struct RestoreOrchestrator {
    services: Arc<Services>,
    available: AvailableMethods,
    backups: BackupOrchestrator,
}

impl RestoreOrchestrator {
    pub fn new(services: Arc<Services>, available: AvailableMethods) -> Self {
        Self {
            backups: BackupOrchestrator::new(services.clone(), available),
            services,
            available,
        }
    }

    pub async fn detect(services: Arc<Services>) -> Self {
        let available = services.detect_methods().await;
        Self::new(services, available)
    }

    pub async fn restore_latest(
        &self,
        tenant: &Tenant,
        options: RestoreOptions,
    ) -> Result<RestoreStats, BackupError> {
        let record = self
            .services
            .catalog
            .list(&tenant.id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackupError::NoBackups(tenant.id.clone()))?;
        self.restore(tenant, &record, options).await
    }

    pub async fn restore_file(
        &self,
        tenant: &Tenant,
        filename: &str,
        options: RestoreOptions,
    ) -> Result<RestoreStats, BackupError> {
        let record = self
            .services
            .catalog
            .find(&tenant.id, filename)
            .await?
            .ok_or_else(|| BackupError::RecordNotFound(filename.to_owned()))?;
        self.restore(tenant, &record, options).await
    }

    /// Replaces the tenant's database with the contents of `record`.
    ///
    /// Everything up to the drop (download, checksum, decompression, optional safety backup)
    /// can fail without touching the database. Once the database has been recreated a failed
    /// load leaves it empty or partially populated.
    pub async fn restore(
        &self,
        tenant: &Tenant,
        record: &BackupRecord,
        options: RestoreOptions,
    ) -> Result<RestoreStats, BackupError> {
        let started = Instant::now();
        if !record.path.starts_with(&format!("{}/", tenant_prefix(&tenant.id))) {
            return Err(BackupError::RecordNotFound(record.filename.clone()));
        }

        let scope = TenantScope::enter(self.services.tenants.clone(), tenant)?;
        let info = scope.info().clone();
        if let Err(e) = self.services.check_restore_target(&info.database) {
            warn!(tenant = %tenant.id, database = %info.database, error = %e, "restore target refused");
            return Err(e);
        }
        let loader = self.loader(record.method, &info)?;

        let temp = scratch_file(&self.services.settings.temp_dir, "restore.sql")?;
        self.fetch(record, &temp).await?;

        if options.safety_backup {
            let safety = self.backups.create_backup(tenant, BackupOptions::default()).await?;
            info!(tenant = %tenant.id, filename = %safety.filename, "safety backup taken");
        }

        self.recreate(&info).await?;
        info!(tenant = %tenant.id, database = %info.database, "database recreated");

        let statements = self.load(loader, &info, &temp).await?;
        let (tables, rows) = self.stats(&info).await?;
        drop(temp);

        let stats = RestoreStats {
            method: record.method,
            tables,
            rows,
            statements,
            duration_ms: i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX),
        };
        info!(
            tenant = %tenant.id,
            filename = %record.filename,
            tables = stats.tables,
            rows = stats.rows,
            duration_ms = stats.duration_ms,
            "restore finished"
        );
        Ok(stats)
    }

    /// Downloads, verifies and decompresses the backup into `dest`.
    async fn fetch(&self, record: &BackupRecord, dest: &Path) -> Result<(), BackupError> {
        self.services.storage.get_to_file(&record.path, dest).await?;

        if let Some(expected) = &record.checksum {
            let path = dest.to_owned();
            let (actual, _) = tokio::task::spawn_blocking(move || file_checksum(&path)).await??;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(BackupError::IntegrityMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        if record.compressed {
            let path = dest.to_owned();
            tokio::task::spawn_blocking(move || compress::decode(&path))
                .await?
                .map_err(BackupError::Decompression)?;
        }
        Ok(())
    }

    /// Picks the loader before anything destructive happens. External dumps prefer the
    /// client; everything else replays in process unless the connector lacks the driver.
    fn loader(&self, method: BackupMethod, info: &DatabaseConnectionInfo) -> Result<Loader, BackupError> {
        let in_process = self.services.server.supports(info.driver);
        let client = self.available.external_restore;
        match (method, in_process, client) {
            (BackupMethod::ExternalDump, _, true) => Ok(Loader::Client),
            (_, true, _) => {
                if method == BackupMethod::ExternalDump {
                    info!(database = %info.database, "restore binary unavailable, replaying dump in process");
                }
                Ok(Loader::Replay)
            }
            (_, false, true) => Ok(Loader::Client),
            (_, false, false) => Err(BackupError::UnsupportedMethod(method)),
        }
    }

    fn client(&self) -> ExternalRestorer {
        ExternalRestorer::new(
            self.services.runner.clone(),
            &self.services.tools.restore,
            self.services.settings.tool_timeout,
        )
    }

    async fn recreate(&self, info: &DatabaseConnectionInfo) -> Result<(), BackupError> {
        if !self.services.server.supports(info.driver) {
            return self.client().recreate_database(info).await.map_err(BackupError::Restore);
        }
        let server = self.services.server.clone();
        let target = info.clone();
        tokio::task::spawn_blocking(move || server.recreate_database(&target))
            .await?
            .map_err(BackupError::Restore)
    }

    /// Table count and row count after the load; the client path reports the server's estimate.
    async fn stats(&self, info: &DatabaseConnectionInfo) -> Result<(usize, u64), BackupError> {
        if !self.services.server.supports(info.driver) {
            return self.client().stats(info).await.map_err(BackupError::Restore);
        }
        let server = self.services.server.clone();
        let target = info.clone();
        tokio::task::spawn_blocking(move || {
            let conn = server.connect(&target)?;
            collect_stats(conn.as_ref())
        })
        .await?
        .map_err(BackupError::Restore)
    }

    /// Returns the number of statements replayed, zero for client loads.
    async fn load(
        &self,
        loader: Loader,
        info: &DatabaseConnectionInfo,
        source: &Path,
    ) -> Result<u64, BackupError> {
        if loader == Loader::Client {
            self.client()
                .restore(info, source)
                .await
                .map_err(BackupError::Restore)?;
            return Ok(0);
        }

        let server = self.services.server.clone();
        let info = info.clone();
        let source: PathBuf = source.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = server.connect(&info)?;
            replay_file(conn.as_ref(), &source, Flavor::from(info.driver))
        })
        .await?
        .map_err(BackupError::Restore)
    }
}
