use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tenant_backup_core::Driver;
use tenant_backup_dump::{AvailableMethods, DatabaseServer, MethodDetector, ProcessRunner, ToolPaths};
use tenant_backup_storage::{MetadataStore, StorageBackend};

use crate::tenancy::TenantContext;
use crate::BackupError;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Local scratch space for dumps before upload and after download.
    pub temp_dir: PathBuf,
    /// Driver of the tenant connection template.
    pub driver: Driver,
    /// Restores never target this database. Restores are refused while it is unset.
    pub protected_database: Option<String>,
    pub tool_timeout: Duration,
    pub rows_per_insert: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            driver: Driver::Sqlite,
            protected_database: None,
            tool_timeout: Duration::from_secs(3600),
            rows_per_insert: None,
        }
    }
}

/// Collaborators shared by the orchestrators.
pub struct Services {
    pub storage: Arc<dyn StorageBackend>,
    pub catalog: Arc<dyn MetadataStore>,
    pub tenants: Arc<dyn TenantContext>,
    pub server: Arc<dyn DatabaseServer>,
    pub runner: Arc<dyn ProcessRunner>,
    pub tools: ToolPaths,
    pub settings: Settings,
}

impl Services {
    pub async fn detect_methods(&self) -> AvailableMethods {
        let mut available = MethodDetector::new(self.runner.clone(), self.tools.clone())
            .detect()
            .await;
        available.native = self.server.supports(self.settings.driver);
        available
    }

    /// Refuses `database` when it is the protected one or when none has been configured.
    pub(crate) fn check_restore_target(&self, database: &str) -> Result<(), BackupError> {
        match self.settings.protected_database.as_deref() {
            None => Err(BackupError::ProtectedDatabaseUnset),
            Some(protected) if protected.eq_ignore_ascii_case(database) => {
                Err(BackupError::ProtectedDatabase(database.to_owned()))
            }
            Some(_) => Ok(()),
        }
    }
}
