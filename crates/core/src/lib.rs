pub mod backup;
pub mod hash;
pub mod naming;
pub mod tenant;

pub use backup::{BackupKind, BackupMethod, BackupRecord, NewBackupRecord, RestoreStats, UnknownMethod};
pub use hash::file_checksum;
pub use tenant::{DatabaseConnectionInfo, Driver, Tenant};
