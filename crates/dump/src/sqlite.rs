use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tenant_backup_core::{DatabaseConnectionInfo, Driver};
use tracing::debug;

use crate::connector::{DatabaseConnector, DatabaseServer, SqlValue};
use crate::sql::{sqlite_encoding, Flavor};
use crate::DumpError;

/// Tenant databases stored as `<host>/<database>.sqlite` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteServer;

impl SqliteServer {
    fn ensure_driver(&self, info: &DatabaseConnectionInfo) -> Result<(), DumpError> {
        if self.supports(info.driver) {
            Ok(())
        } else {
            Err(DumpError::UnsupportedDriver(info.driver))
        }
    }
}

impl DatabaseServer for SqliteServer {
    fn supports(&self, driver: Driver) -> bool {
        driver == Driver::Sqlite
    }

    fn connect(&self, info: &DatabaseConnectionInfo) -> Result<Box<dyn DatabaseConnector>, DumpError> {
        self.ensure_driver(info)?;
        let path = info.sqlite_path();
        if !path.exists() {
            return Err(DumpError::MissingDatabase(info.database.clone()));
        }
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(10))?;
        Ok(Box::new(SqliteConnector::new(conn)))
    }

    fn recreate_database(&self, info: &DatabaseConnectionInfo) -> Result<(), DumpError> {
        self.ensure_driver(info)?;
        let path = info.sqlite_path();
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let file = path.with_file_name(format!("{}.sqlite{suffix}", info.database));
            remove_if_present(&file)?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(&format!(
            "PRAGMA encoding = '{}'; PRAGMA user_version = 0;",
            sqlite_encoding(&info.charset)
        ))?;
        debug!(database = %info.database, path = %path.display(), "sqlite database recreated");
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

pub struct SqliteConnector {
    conn: Connection,
}

impl SqliteConnector {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn quote(table: &str) -> String {
        Flavor::Sqlite.quote_ident(table)
    }
}

impl DatabaseConnector for SqliteConnector {
    fn driver(&self) -> Driver {
        Driver::Sqlite
    }

    fn list_tables(&self) -> Result<Vec<String>, DumpError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn create_table_sql(&self, table: &str) -> Result<String, DumpError> {
        let sql = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        sql.ok_or_else(|| DumpError::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    fn secondary_sql(&self, table: &str) -> Result<Vec<String>, DumpError> {
        let mut stmt = self.conn.prepare(
            "SELECT sql FROM sqlite_master
             WHERE tbl_name = ?1 AND type IN ('index', 'trigger') AND sql IS NOT NULL
             ORDER BY type, name",
        )?;
        let defs = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(defs)
    }

    fn columns(&self, table: &str) -> Result<Vec<String>, DumpError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn views(&self) -> Result<Vec<(String, String)>, DumpError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type = 'view' AND sql IS NOT NULL
             ORDER BY rowid",
        )?;
        let views = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(views)
    }

    fn for_each_row(
        &self,
        table: &str,
        visit: &mut dyn FnMut(&[SqlValue]) -> Result<(), DumpError>,
    ) -> Result<u64, DumpError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {}", Self::quote(table)))?;
        let width = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut values = Vec::with_capacity(width);
        let mut seen = 0;
        while let Some(row) = rows.next()? {
            values.clear();
            for idx in 0..width {
                values.push(to_value(row.get_ref(idx)?));
            }
            visit(&values)?;
            seen += 1;
        }
        Ok(seen)
    }

    fn row_count(&self, table: &str) -> Result<u64, DumpError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", Self::quote(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn execute(&self, sql: &str) -> Result<(), DumpError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

fn to_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => SqlValue::Text(text),
            Err(e) => SqlValue::RawText(e.into_bytes()),
        },
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}
