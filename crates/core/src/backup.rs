use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// What a backup contains.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    Structure,
}

impl BackupKind {
    pub fn from_structure_only(structure_only: bool) -> Self {
        if structure_only {
            Self::Structure
        } else {
            Self::Full
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Structure => "structure",
        }
    }
}

/// How a dump is produced, and therefore how it is loaded back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BackupMethod {
    /// External dump binary (mysqldump, sqlite3 `.dump`).
    #[serde(rename = "external")]
    ExternalDump,
    /// In-process exporter, compact dialect.
    #[serde(rename = "native")]
    Native,
    /// In-process exporter with explicit INSERT column lists.
    #[serde(rename = "portable")]
    Portable,
}

impl BackupMethod {
    /// Selection order used when the caller does not name a method.
    pub const PRIORITY: [BackupMethod; 3] = [Self::ExternalDump, Self::Native, Self::Portable];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExternalDump => "external",
            Self::Native => "native",
            Self::Portable => "portable",
        }
    }

    pub fn is_native(self) -> bool {
        matches!(self, Self::Native | Self::Portable)
    }
}

impl fmt::Display for BackupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown backup method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for BackupMethod {
    type Err = UnknownMethod;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "external" | "dump" => Ok(Self::ExternalDump),
            "native" => Ok(Self::Native),
            "portable" => Ok(Self::Portable),
            other => Err(UnknownMethod(other.to_owned())),
        }
    }
}

/// A cataloged backup. Never mutated after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRecord {
    pub id: Uuid,
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub kind: BackupKind,
    pub method: BackupMethod,
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBackupRecord {
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub kind: BackupKind,
    pub method: BackupMethod,
    pub compressed: bool,
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewBackupRecord {
    pub fn into_record(self) -> BackupRecord {
        BackupRecord {
            id: Uuid::new_v4(),
            filename: self.filename,
            path: self.path,
            size_bytes: self.size_bytes,
            kind: self.kind,
            method: self.method,
            compressed: self.compressed,
            checksum: self.checksum,
            created_at: self.created_at,
        }
    }
}

/// Figures reported after a restore completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoreStats {
    pub method: BackupMethod,
    pub tables: usize,
    /// Sum of per-table row counts; engines that only estimate report the estimate.
    pub rows: u64,
    /// Statements replayed by a native load, zero when an external tool loaded the dump.
    pub statements: u64,
    pub duration_ms: i64,
}
