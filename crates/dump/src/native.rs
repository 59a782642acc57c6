use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use tenant_backup_core::naming::header_timestamp;
use tenant_backup_core::{BackupMethod, DatabaseConnectionInfo};
use tracing::debug;

use crate::connector::{DatabaseConnector, SqlValue};
use crate::sql::Flavor;
use crate::DumpError;

/// Formatting variant of a native dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Positional `INSERT INTO t VALUES`.
    Compact,
    /// `INSERT INTO t (a, b) VALUES`, tolerant of column reordering on the target.
    Portable,
}

impl Dialect {
    pub fn for_method(method: BackupMethod) -> Option<Self> {
        match method {
            BackupMethod::Native => Some(Self::Compact),
            BackupMethod::Portable => Some(Self::Portable),
            BackupMethod::ExternalDump => None,
        }
    }

    fn header(self) -> &'static str {
        match self {
            Self::Compact => "Tenant database dump",
            Self::Portable => "Tenant database dump (portable, explicit column lists)",
        }
    }

    fn explicit_columns(self) -> bool {
        matches!(self, Self::Portable)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub structure_only: bool,
    /// Upper bound on value tuples per INSERT; `None` writes one INSERT per table.
    pub rows_per_insert: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub tables: usize,
    pub views: usize,
    pub rows: u64,
}

/// In-process dump generator; needs nothing but a [`DatabaseConnector`].
#[derive(Debug, Clone, Copy)]
pub struct NativeExporter {
    dialect: Dialect,
}

impl NativeExporter {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn export_to_file(
        &self,
        conn: &dyn DatabaseConnector,
        info: &DatabaseConnectionInfo,
        options: ExportOptions,
        dest: &Path,
    ) -> Result<ExportSummary, DumpError> {
        let mut out = BufWriter::new(File::create(dest)?);
        let summary = self.export(conn, info, options, &mut out)?;
        out.flush()?;
        Ok(summary)
    }

    pub fn export<W: Write>(
        &self,
        conn: &dyn DatabaseConnector,
        info: &DatabaseConnectionInfo,
        options: ExportOptions,
        mut out: W,
    ) -> Result<ExportSummary, DumpError> {
        let flavor = Flavor::from(conn.driver());
        let tables = conn.list_tables()?;

        writeln!(out, "-- {}", self.dialect.header())?;
        writeln!(out, "-- Database: {}", info.database)?;
        writeln!(out, "-- Generated: {}", header_timestamp(Utc::now()))?;
        writeln!(
            out,
            "-- Contents: {}",
            if options.structure_only { "schema only" } else { "schema and data" }
        )?;
        writeln!(out)?;
        for stmt in flavor.preamble(info) {
            writeln!(out, "{stmt};")?;
        }

        let mut summary = ExportSummary::default();
        for table in &tables {
            let quoted = flavor.quote_ident(table);
            writeln!(out)?;
            writeln!(out, "-- Table structure for {quoted}")?;
            writeln!(out, "DROP TABLE IF EXISTS {quoted};")?;
            writeln!(out, "{};", trim_statement(&conn.create_table_sql(table)?))?;

            if !options.structure_only {
                summary.rows += self.write_rows(conn, flavor, table, options.rows_per_insert, &mut out)?;
            }
            for def in conn.secondary_sql(table)? {
                writeln!(out, "{};", trim_statement(&def))?;
            }
            summary.tables += 1;
        }

        for (view, sql) in conn.views()? {
            let quoted = flavor.quote_ident(&view);
            writeln!(out)?;
            writeln!(out, "-- View structure for {quoted}")?;
            writeln!(out, "DROP VIEW IF EXISTS {quoted};")?;
            writeln!(out, "{};", trim_statement(&sql))?;
            for def in conn.secondary_sql(&view)? {
                writeln!(out, "{};", trim_statement(&def))?;
            }
            summary.views += 1;
        }

        writeln!(out)?;
        for stmt in flavor.epilogue() {
            writeln!(out, "{stmt};")?;
        }
        debug!(
            database = %info.database,
            tables = summary.tables,
            views = summary.views,
            rows = summary.rows,
            "native export finished"
        );
        Ok(summary)
    }

    fn write_rows<W: Write>(
        &self,
        conn: &dyn DatabaseConnector,
        flavor: Flavor,
        table: &str,
        rows_per_insert: Option<usize>,
        out: &mut W,
    ) -> Result<u64, DumpError> {
        let quoted = flavor.quote_ident(table);
        let insert_head = if self.dialect.explicit_columns() {
            let columns = conn
                .columns(table)?
                .iter()
                .map(|c| flavor.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            format!("INSERT INTO {quoted} ({columns}) VALUES")
        } else {
            format!("INSERT INTO {quoted} VALUES")
        };
        let limit = rows_per_insert.filter(|n| *n > 0).unwrap_or(usize::MAX);

        let mut locked = false;
        let mut in_statement = 0usize;
        let mut tuple = String::new();
        let written = conn.for_each_row(table, &mut |row: &[SqlValue]| -> Result<(), DumpError> {
            if !locked {
                writeln!(out, "-- Data for {quoted}")?;
                if let Some(lock) = flavor.lock_table(table) {
                    writeln!(out, "{lock};")?;
                }
                locked = true;
            }
            if in_statement == 0 {
                writeln!(out, "{insert_head}")?;
            } else {
                writeln!(out, ",")?;
            }

            tuple.clear();
            tuple.push('(');
            for (idx, value) in row.iter().enumerate() {
                if idx > 0 {
                    tuple.push(',');
                }
                flavor.push_literal(&mut tuple, value);
            }
            tuple.push(')');
            out.write_all(tuple.as_bytes())?;

            in_statement += 1;
            if in_statement >= limit {
                writeln!(out, ";")?;
                in_statement = 0;
            }
            Ok(())
        })?;

        if in_statement > 0 {
            writeln!(out, ";")?;
        }
        if locked {
            if let Some(unlock) = flavor.unlock_tables() {
                writeln!(out, "{unlock};")?;
            }
        }
        Ok(written)
    }
}

fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}
