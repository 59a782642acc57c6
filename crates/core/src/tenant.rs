use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// An isolated customer unit owning one dedicated database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    pub id: String,
    pub database: String,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl Tenant {
    pub fn new(id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            database: database.into(),
            domains: Vec::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    /// Domain used in backup filenames; falls back to the tenant id.
    pub fn primary_domain(&self) -> &str {
        self.domains.first().map(String::as_str).unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Driver {
    #[serde(rename = "mysql")]
    MySql,
    #[default]
    #[serde(rename = "sqlite")]
    Sqlite,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        })
    }
}

/// Connection parameters for one tenant database. Resolved per operation, never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConnectionInfo {
    pub driver: Driver,
    /// Server host. For SQLite this is the directory holding `<database>.sqlite`.
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    pub charset: String,
    pub collation: String,
}

impl DatabaseConnectionInfo {
    pub fn sqlite_path(&self) -> PathBuf {
        PathBuf::from(&self.host).join(format!("{}.sqlite", self.database))
    }
}

impl fmt::Debug for DatabaseConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnectionInfo")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .finish()
    }
}
