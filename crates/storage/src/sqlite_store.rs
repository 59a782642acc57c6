use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use tenant_backup_core::{BackupKind, BackupMethod, BackupRecord};
use uuid::Uuid;

use crate::store::MetadataStore;
use crate::StorageError;

/// SQLite-backed catalog. Each method opens a fresh connection on the blocking pool.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::io(&parent.display().to_string(), e))?;
        }
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    fn init_db(&self) -> Result<(), StorageError> {
        let conn = connect(&self.db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS backup_records (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                filename TEXT NOT NULL,
                path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                kind TEXT NOT NULL,
                method TEXT NOT NULL,
                compressed INTEGER NOT NULL,
                checksum TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS backup_records_tenant
                ON backup_records (tenant, created_at);",
        )?;
        Ok(())
    }
}

fn connect(db_path: &Path) -> Result<Connection, StorageError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

#[async_trait::async_trait]
impl MetadataStore for SqliteStore {
    async fn append(&self, tenant: &str, record: &BackupRecord) -> Result<(), StorageError> {
        let record = record.clone();
        let tenant = tenant.to_owned();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = connect(&db_path)?;
            conn.execute(
                "INSERT INTO backup_records (id, tenant, filename, path, size_bytes, kind, method,
                 compressed, checksum, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.to_string(),
                    tenant,
                    record.filename,
                    record.path,
                    record.size_bytes as i64,
                    record.kind.as_str(),
                    record.method.as_str(),
                    record.compressed,
                    record.checksum,
                    timestamp_str(record.created_at),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    async fn list(&self, tenant: &str) -> Result<Vec<BackupRecord>, StorageError> {
        let tenant = tenant.to_owned();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = connect(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT id, filename, path, size_bytes, kind, method, compressed, checksum, created_at
                 FROM backup_records WHERE tenant = ?1 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt.query_map([tenant], row_to_record)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
        .await?
    }

    async fn remove(&self, tenant: &str, filenames: &[String]) -> Result<usize, StorageError> {
        let tenant = tenant.to_owned();
        let filenames = filenames.to_vec();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = connect(&db_path)?;
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM backup_records WHERE tenant = ?1 AND filename = ?2")?;
                for filename in &filenames {
                    removed += stmt.execute(params![tenant, filename])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await?
    }
}

fn timestamp_str(at: DateTime<Utc>) -> String {
    // Fixed-width so lexical order is chronological order.
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<BackupRecord> {
    let id: String = row.get(0)?;
    let size: i64 = row.get(3)?;
    let kind: String = row.get(4)?;
    let method: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    Ok(BackupRecord {
        id: Uuid::parse_str(&id).map_err(|e| conversion_err(0, e))?,
        filename: row.get(1)?,
        path: row.get(2)?,
        size_bytes: u64::try_from(size).map_err(|e| conversion_err(3, e))?,
        kind: parse_kind(&kind).ok_or_else(|| {
            conversion_err(4, std::io::Error::other(format!("unknown kind {kind}")))
        })?,
        method: method
            .parse::<BackupMethod>()
            .map_err(|e| conversion_err(5, e))?,
        compressed: row.get(6)?,
        checksum: row.get(7)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(8, e))?,
    })
}

fn parse_kind(raw: &str) -> Option<BackupKind> {
    match raw {
        "full" => Some(BackupKind::Full),
        "structure" => Some(BackupKind::Structure),
        _ => None,
    }
}

fn conversion_err<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}
