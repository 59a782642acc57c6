use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tenant_backup_core::{DatabaseConnectionInfo, Driver};
use tracing::info;

use crate::connector::SqlValue;
use crate::process::{Invocation, ProcessRunner};
use crate::sql::{session_word, Flavor};
use crate::DumpError;

/// External client binaries used for dumping and loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub dump: PathBuf,
    pub restore: PathBuf,
}

impl ToolPaths {
    /// Stock binary names, resolved through `PATH`.
    pub fn for_driver(driver: Driver) -> Self {
        match driver {
            Driver::MySql => Self {
                dump: PathBuf::from("mysqldump"),
                restore: PathBuf::from("mysql"),
            },
            Driver::Sqlite => Self {
                dump: PathBuf::from("sqlite3"),
                restore: PathBuf::from("sqlite3"),
            },
        }
    }
}

/// Builds the dump command; stdout goes to `dest`.
pub fn dump_invocation(
    program: &Path,
    info: &DatabaseConnectionInfo,
    structure_only: bool,
    dest: &Path,
) -> Invocation {
    let inv = Invocation::new(program).stdout_to(dest);
    match info.driver {
        Driver::MySql => {
            let mut inv = with_mysql_connection(inv, info)
                .arg("--single-transaction")
                .arg("--routines")
                .arg("--triggers")
                .arg("--no-tablespaces");
            if structure_only {
                inv = inv.arg("--no-data");
            }
            inv.arg(&info.database)
        }
        Driver::Sqlite => inv
            .arg(info.sqlite_path())
            .arg(if structure_only { ".schema" } else { ".dump" }),
    }
}

/// Builds the load command; stdin comes from `source`.
pub fn restore_invocation(program: &Path, info: &DatabaseConnectionInfo, source: &Path) -> Invocation {
    let inv = Invocation::new(program).stdin_from(source);
    match info.driver {
        Driver::MySql => with_mysql_connection(inv, info).arg(&info.database),
        Driver::Sqlite => inv.arg("-bail").arg(info.sqlite_path()),
    }
}

/// Builds the client command that drops and recreates the database empty. `None` for
/// file-backed engines, which have no server-side database to recreate.
pub fn recreate_invocation(program: &Path, info: &DatabaseConnectionInfo) -> Option<Invocation> {
    match info.driver {
        Driver::MySql => {
            let db = Flavor::MySql.quote_ident(&info.database);
            let mut create = format!(
                "CREATE DATABASE {db} CHARACTER SET {}",
                session_word(&info.charset, "utf8mb4")
            );
            if !info.collation.is_empty() {
                create.push_str(&format!(" COLLATE {}", session_word(&info.collation, "utf8mb4_unicode_ci")));
            }
            Some(
                with_mysql_connection(Invocation::new(program), info)
                    .arg(format!("--execute=DROP DATABASE IF EXISTS {db}; {create}")),
            )
        }
        Driver::Sqlite => None,
    }
}

/// Builds the client query for base-table count and the engine's row estimate.
pub fn stats_invocation(program: &Path, info: &DatabaseConnectionInfo) -> Option<Invocation> {
    match info.driver {
        Driver::MySql => {
            let mut schema = String::new();
            Flavor::MySql.push_literal(&mut schema, &SqlValue::Text(info.database.clone()));
            Some(
                with_mysql_connection(Invocation::new(program), info)
                    .arg("--batch")
                    .arg("--skip-column-names")
                    .arg(format!(
                        "--execute=SELECT COUNT(*), COALESCE(SUM(TABLE_ROWS), 0) \
                         FROM information_schema.TABLES \
                         WHERE TABLE_SCHEMA = {schema} AND TABLE_TYPE = 'BASE TABLE'"
                    )),
            )
        }
        Driver::Sqlite => None,
    }
}

fn parse_stats(stdout: &[u8]) -> Option<(usize, u64)> {
    let text = String::from_utf8_lossy(stdout);
    let mut fields = text.split_whitespace();
    let tables = fields.next()?.parse().ok()?;
    let rows = fields.next()?.parse().ok()?;
    Some((tables, rows))
}

// The password goes through MYSQL_PWD so it never shows up in a process listing.
fn with_mysql_connection(inv: Invocation, info: &DatabaseConnectionInfo) -> Invocation {
    let mut inv = inv
        .arg(format!("--host={}", info.host))
        .arg(format!("--port={}", info.port))
        .arg(format!("--user={}", info.username));
    if !info.charset.is_empty() {
        inv = inv.arg(format!("--default-character-set={}", info.charset));
    }
    match &info.password {
        Some(password) => inv.env("MYSQL_PWD", password.clone()),
        None => inv,
    }
}

/// Dumps through the external dump binary.
pub struct ExternalExporter {
    runner: Arc<dyn ProcessRunner>,
    program: PathBuf,
    timeout: Duration,
}

impl ExternalExporter {
    pub fn new(runner: Arc<dyn ProcessRunner>, program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            runner,
            program: program.into(),
            timeout,
        }
    }

    pub async fn export(
        &self,
        info: &DatabaseConnectionInfo,
        structure_only: bool,
        dest: &Path,
    ) -> Result<(), DumpError> {
        let inv = dump_invocation(&self.program, info, structure_only, dest).timeout(self.timeout);
        let program = inv.program_name();
        self.runner.run(&inv).await?.check(&program)?;
        info!(program = %program, database = %info.database, "external dump finished");
        Ok(())
    }
}

/// Loads a dump by piping it into the external client.
pub struct ExternalRestorer {
    runner: Arc<dyn ProcessRunner>,
    program: PathBuf,
    timeout: Duration,
}

impl ExternalRestorer {
    pub fn new(runner: Arc<dyn ProcessRunner>, program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            runner,
            program: program.into(),
            timeout,
        }
    }

    pub async fn restore(&self, info: &DatabaseConnectionInfo, source: &Path) -> Result<(), DumpError> {
        let inv = restore_invocation(&self.program, info, source).timeout(self.timeout);
        let program = inv.program_name();
        self.runner.run(&inv).await?.check(&program)?;
        info!(program = %program, database = %info.database, "external restore finished");
        Ok(())
    }

    pub async fn recreate_database(&self, info: &DatabaseConnectionInfo) -> Result<(), DumpError> {
        let inv = recreate_invocation(&self.program, info)
            .ok_or(DumpError::UnsupportedDriver(info.driver))?
            .timeout(self.timeout);
        let program = inv.program_name();
        self.runner.run(&inv).await?.check(&program)?;
        info!(program = %program, database = %info.database, "database recreated through client");
        Ok(())
    }

    /// Table count and approximate row count as reported by the server.
    pub async fn stats(&self, info: &DatabaseConnectionInfo) -> Result<(usize, u64), DumpError> {
        let inv = stats_invocation(&self.program, info)
            .ok_or(DumpError::UnsupportedDriver(info.driver))?
            .timeout(self.timeout);
        let program = inv.program_name();
        let out = self.runner.run(&inv).await?.check(&program)?;
        parse_stats(&out.stdout).ok_or_else(|| DumpError::ToolFailed {
            program,
            status: "unexpected output".to_owned(),
            stderr: String::from_utf8_lossy(&out.stdout).trim().to_owned(),
        })
    }
}
