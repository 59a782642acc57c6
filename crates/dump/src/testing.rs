use std::path::Path;

use tenant_backup_core::{DatabaseConnectionInfo, Driver};

pub(crate) fn sqlite_info(dir: &Path, database: &str) -> DatabaseConnectionInfo {
    DatabaseConnectionInfo {
        driver: Driver::Sqlite,
        host: dir.display().to_string(),
        port: 0,
        database: database.to_owned(),
        username: String::new(),
        password: None,
        charset: "utf8".into(),
        collation: String::new(),
    }
}
