//! Scoped access to a tenant's database connection parameters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tenant_backup_core::naming::is_valid_tenant_id;
use tenant_backup_core::{DatabaseConnectionInfo, Tenant};
use tracing::debug;

use crate::BackupError;

/// Switches the process into a tenant's context and back.
pub trait TenantContext: Send + Sync {
    fn enter(&self, tenant: &Tenant) -> Result<DatabaseConnectionInfo, BackupError>;

    fn exit(&self, tenant: &Tenant);
}

/// Holds a tenant context open; [`TenantContext::exit`] runs when the scope is dropped.
pub struct TenantScope {
    ctx: Arc<dyn TenantContext>,
    tenant: Tenant,
    info: DatabaseConnectionInfo,
}

impl TenantScope {
    pub fn enter(ctx: Arc<dyn TenantContext>, tenant: &Tenant) -> Result<Self, BackupError> {
        if !is_valid_tenant_id(&tenant.id) {
            return Err(BackupError::Tenant {
                tenant: tenant.id.clone(),
                reason: "tenant id may only contain letters, digits, '-' and '_'".into(),
            });
        }
        let info = ctx.enter(tenant)?;
        debug!(tenant = %tenant.id, database = %info.database, "entered tenant context");
        Ok(Self {
            ctx,
            tenant: tenant.clone(),
            info,
        })
    }

    pub fn info(&self) -> &DatabaseConnectionInfo {
        &self.info
    }
}

impl Drop for TenantScope {
    fn drop(&mut self) {
        self.ctx.exit(&self.tenant);
        debug!(tenant = %self.tenant.id, "left tenant context");
    }
}

/// Runs `f` inside the tenant's context.
pub fn run<T>(
    ctx: Arc<dyn TenantContext>,
    tenant: &Tenant,
    f: impl FnOnce(&DatabaseConnectionInfo) -> T,
) -> Result<T, BackupError> {
    let scope = TenantScope::enter(ctx, tenant)?;
    Ok(f(scope.info()))
}

/// Derives each tenant's connection from one shared template by swapping the database name.
pub struct ConfiguredTenants {
    template: DatabaseConnectionInfo,
    active: AtomicUsize,
}

impl ConfiguredTenants {
    pub fn new(template: DatabaseConnectionInfo) -> Self {
        Self {
            template,
            active: AtomicUsize::new(0),
        }
    }

    /// Number of contexts currently entered.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl TenantContext for ConfiguredTenants {
    fn enter(&self, tenant: &Tenant) -> Result<DatabaseConnectionInfo, BackupError> {
        if tenant.database.trim().is_empty() {
            return Err(BackupError::Tenant {
                tenant: tenant.id.clone(),
                reason: "no database configured".into(),
            });
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(DatabaseConnectionInfo {
            database: tenant.database.clone(),
            ..self.template.clone()
        })
    }

    fn exit(&self, _tenant: &Tenant) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
