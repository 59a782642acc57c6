use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tenant_backup_core::{DatabaseConnectionInfo, Driver, Tenant};
use tenant_backup_dump::{SqliteServer, SystemRunner, ToolPaths};
use tenant_backup_storage::{LocalStorage, MetadataStore, SidecarStore, SqliteStore, StorageBackend};

use crate::services::{Services, Settings};
use crate::tenancy::ConfiguredTenants;

pub const ENV_STORAGE_ROOT: &str = "TENANT_BACKUP_STORAGE_ROOT";
pub const ENV_TEMP_DIR: &str = "TENANT_BACKUP_TEMP_DIR";
pub const ENV_DB_PASSWORD: &str = "TENANT_BACKUP_DB_PASSWORD";
pub const ENV_PROTECTED_DB: &str = "TENANT_BACKUP_PROTECTED_DB";
pub const ENV_RETENTION_DAYS: &str = "TENANT_BACKUP_RETENTION_DAYS";

const DEFAULT_CENTRAL_DATABASE: &str = "central";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    pub database: DatabaseConfig,
    pub tools: ToolsConfig,
    pub export: ExportConfig,
    pub tenants: Vec<Tenant>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<String>,
    pub temp_dir: Option<String>,
    pub retention_days: Option<i64>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CatalogBackend {
    #[default]
    Sidecar,
    Sqlite,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CatalogConfig {
    pub backend: CatalogBackend,
    /// SQLite catalog file; defaults to `<storage root>/catalog.sqlite3`.
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub driver: Driver,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    /// The application's central database. Defaults to `central`.
    pub name: Option<String>,
    /// Never a restore target. Defaults to the central database.
    pub protected: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ToolsConfig {
    pub dump: Option<String>,
    pub restore: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ExportConfig {
    pub rows_per_insert: Option<usize>,
    pub concurrency: Option<usize>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// Effective settings after applying environment overrides and defaults.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub storage_root: PathBuf,
    pub catalog: CatalogBackend,
    pub catalog_path: PathBuf,
    pub connection: DatabaseConnectionInfo,
    pub tools: ToolPaths,
    pub settings: Settings,
    pub retention_days: i64,
    pub concurrency: usize,
    pub tenants: Vec<Tenant>,
}

impl Config {
    /// Resolves every setting as environment, then file, then default.
    pub fn resolve(&self, env: impl Fn(&str) -> Option<String>) -> Result<RuntimeConfig> {
        let storage_root = PathBuf::from(
            env(ENV_STORAGE_ROOT)
                .or_else(|| self.storage.root.clone())
                .unwrap_or_else(|| "./data/backups".to_owned()),
        );
        let temp_dir = env(ENV_TEMP_DIR)
            .or_else(|| self.storage.temp_dir.clone())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let retention_days = match env(ENV_RETENTION_DAYS) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("invalid {ENV_RETENTION_DAYS}: {raw}"))?,
            None => self.storage.retention_days.unwrap_or(30),
        };

        let db = &self.database;
        let central = db
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CENTRAL_DATABASE.to_owned());
        let (default_host, default_port) = match db.driver {
            Driver::MySql => ("127.0.0.1", 3306),
            Driver::Sqlite => ("./data/tenants", 0),
        };
        let connection = DatabaseConnectionInfo {
            driver: db.driver,
            host: db.host.clone().unwrap_or_else(|| default_host.to_owned()),
            port: db.port.unwrap_or(default_port),
            database: central.clone(),
            username: db.username.clone().unwrap_or_else(|| "root".to_owned()),
            password: env(ENV_DB_PASSWORD).or_else(|| db.password.clone()),
            charset: db.charset.clone().unwrap_or_else(|| "utf8mb4".to_owned()),
            collation: db
                .collation
                .clone()
                .unwrap_or_else(|| "utf8mb4_unicode_ci".to_owned()),
        };

        let defaults = ToolPaths::for_driver(db.driver);
        let tools = ToolPaths {
            dump: self.tools.dump.as_ref().map(PathBuf::from).unwrap_or(defaults.dump),
            restore: self
                .tools
                .restore
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or(defaults.restore),
        };

        let settings = Settings {
            temp_dir,
            driver: db.driver,
            protected_database: Some(
                env(ENV_PROTECTED_DB)
                    .or_else(|| db.protected.clone())
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or(central),
            ),
            tool_timeout: Duration::from_secs(self.tools.timeout_secs.unwrap_or(3600)),
            rows_per_insert: self.export.rows_per_insert.filter(|n| *n > 0),
        };

        Ok(RuntimeConfig {
            catalog: self.catalog.backend,
            catalog_path: self
                .catalog
                .path
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| storage_root.join("catalog.sqlite3")),
            storage_root,
            connection,
            tools,
            settings,
            retention_days,
            concurrency: self.export.concurrency.unwrap_or(4).max(1),
            tenants: self.tenants.clone(),
        })
    }
}

impl RuntimeConfig {
    pub fn tenant(&self, id: &str) -> Result<&Tenant> {
        match self.tenants.iter().find(|t| t.id == id) {
            Some(tenant) => Ok(tenant),
            None => bail!("tenant {id} is not configured"),
        }
    }

    /// Wires the local storage, catalog, SQLite engine and system process runner together.
    pub fn services(&self) -> Result<Services> {
        let storage: Arc<dyn StorageBackend> = Arc::new(
            LocalStorage::new(&self.storage_root)
                .with_context(|| format!("opening storage root {:?}", self.storage_root))?,
        );
        let catalog: Arc<dyn MetadataStore> = match self.catalog {
            CatalogBackend::Sidecar => Arc::new(SidecarStore::new(storage.clone())),
            CatalogBackend::Sqlite => Arc::new(
                SqliteStore::new(self.catalog_path.clone())
                    .with_context(|| format!("opening catalog {:?}", self.catalog_path))?,
            ),
        };
        Ok(Services {
            storage,
            catalog,
            tenants: Arc::new(ConfiguredTenants::new(self.connection.clone())),
            server: Arc::new(SqliteServer),
            runner: Arc::new(SystemRunner),
            tools: self.tools.clone(),
            settings: self.settings.clone(),
        })
    }
}
