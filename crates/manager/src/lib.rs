pub mod backup;
pub mod config;
mod error;
pub mod restore;
pub mod retention;
pub mod services;
pub mod temp;
pub mod tenancy;

pub use backup::{BackupOptions, BackupOrchestrator};
pub use error::BackupError;
pub use restore::{RestoreOptions, RestoreOrchestrator};
pub use retention::{CleanupReport, RetentionSweeper, TenantCleanup};
pub use services::{Services, Settings};
pub use tenancy::{ConfiguredTenants, TenantContext, TenantScope};
