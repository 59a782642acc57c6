use tenant_backup_core::{DatabaseConnectionInfo, Driver};

use crate::DumpError;

/// One column value as read from a table.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// TEXT whose bytes are not valid UTF-8, kept verbatim.
    RawText(Vec<u8>),
    Blob(Vec<u8>),
}

/// A live connection to one tenant database.
///
/// Implementations are used from blocking threads only.
pub trait DatabaseConnector {
    fn driver(&self) -> Driver;

    /// User tables, sorted by name.
    fn list_tables(&self) -> Result<Vec<String>, DumpError>;

    /// The statement that recreates `table`, as reported by the engine.
    fn create_table_sql(&self, table: &str) -> Result<String, DumpError>;

    /// Index and trigger definitions that live outside the table's CREATE statement.
    fn secondary_sql(&self, table: &str) -> Result<Vec<String>, DumpError>;

    fn columns(&self, table: &str) -> Result<Vec<String>, DumpError>;

    /// `(name, CREATE VIEW statement)` pairs in creation order.
    fn views(&self) -> Result<Vec<(String, String)>, DumpError> {
        Ok(Vec::new())
    }

    /// Streams every row of `table` through `visit`; returns the number of rows seen.
    fn for_each_row(
        &self,
        table: &str,
        visit: &mut dyn FnMut(&[SqlValue]) -> Result<(), DumpError>,
    ) -> Result<u64, DumpError>;

    fn row_count(&self, table: &str) -> Result<u64, DumpError>;

    /// Runs raw SQL text without parameters.
    fn execute(&self, sql: &str) -> Result<(), DumpError>;
}

/// Opens tenant connections and manages whole databases.
pub trait DatabaseServer: Send + Sync {
    fn supports(&self, driver: Driver) -> bool;

    fn connect(&self, info: &DatabaseConnectionInfo) -> Result<Box<dyn DatabaseConnector>, DumpError>;

    /// Drops the database if present and creates it empty with the configured charset.
    fn recreate_database(&self, info: &DatabaseConnectionInfo) -> Result<(), DumpError>;
}

/// Table count and summed row counts, read after a restore.
pub fn collect_stats(conn: &dyn DatabaseConnector) -> Result<(usize, u64), DumpError> {
    let tables = conn.list_tables()?;
    let mut rows = 0;
    for table in &tables {
        rows += conn.row_count(table)?;
    }
    Ok((tables.len(), rows))
}
