use std::io;

use tenant_backup_core::BackupMethod;
use tenant_backup_dump::DumpError;
use tenant_backup_storage::StorageError;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup method {0} is not available in this environment")]
    UnsupportedMethod(BackupMethod),

    #[error("export failed")]
    Export(#[source] DumpError),

    #[error("compression failed")]
    Compression(#[source] DumpError),

    #[error("decompression failed")]
    Decompression(#[source] DumpError),

    /// The resolved target is the system's own database.
    #[error("refusing to restore over protected database {0}")]
    ProtectedDatabase(String),

    #[error("no protected database configured, refusing to restore")]
    ProtectedDatabaseUnset,

    #[error("restore failed")]
    Restore(#[source] DumpError),

    #[error("storage error")]
    Storage(#[from] StorageError),

    #[error("backup of tenant {tenant} failed")]
    BackupFailed {
        tenant: String,
        #[source]
        source: Box<BackupError>,
    },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("no backup named {0}")]
    RecordNotFound(String),

    #[error("tenant {0} has no cataloged backups")]
    NoBackups(String),

    #[error("cannot enter context of tenant {tenant}: {reason}")]
    Tenant { tenant: String, reason: String },

    #[error("retention must be a positive number of days, got {0}")]
    InvalidRetention(i64),

    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("background task failed")]
    Task(#[from] JoinError),
}
