use std::io::Read;
use std::path::{Path, PathBuf};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use flate2::read::MultiGzDecoder;
use rusqlite::Connection;
use tempfile::TempDir;
use tenant_backup_core::{
    BackupKind, BackupMethod, BackupRecord, DatabaseConnectionInfo, Driver, NewBackupRecord, Tenant,
};
use tenant_backup_dump::{AvailableMethods, SqliteServer, SystemRunner, ToolPaths};
use tenant_backup_manager::{
    BackupError, BackupOptions, BackupOrchestrator, ConfiguredTenants, RestoreOptions,
    RestoreOrchestrator, RetentionSweeper, Services, Settings,
};
use tenant_backup_storage::{
    LocalStorage, MetadataStore, SidecarStore, SqliteStore, StorageBackend, StorageError,
};

struct Harness {
    tmp: TempDir,
    services: Arc<Services>,
    tenants: Arc<ConfiguredTenants>,
}

type WrapStorage = Box<dyn FnOnce(LocalStorage) -> Arc<dyn StorageBackend>>;

struct Setup {
    protected: Option<&'static str>,
    tools: ToolPaths,
    sqlite_catalog: bool,
    driver: Driver,
    storage: Option<WrapStorage>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            protected: Some("central"),
            tools: missing_tools(),
            sqlite_catalog: false,
            driver: Driver::Sqlite,
            storage: None,
        }
    }
}

impl Harness {
    fn new() -> Self {
        Self::with(Setup::default())
    }

    fn with(setup: Setup) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let local = LocalStorage::new(tmp.path().join("storage")).unwrap();
        let storage: Arc<dyn StorageBackend> = match setup.storage {
            Some(wrap) => wrap(local),
            None => Arc::new(local),
        };
        let catalog: Arc<dyn MetadataStore> = if setup.sqlite_catalog {
            Arc::new(SqliteStore::new(tmp.path().join("catalog.sqlite3")).unwrap())
        } else {
            Arc::new(SidecarStore::new(storage.clone()))
        };
        let tenants = Arc::new(ConfiguredTenants::new(DatabaseConnectionInfo {
            driver: setup.driver,
            host: tmp.path().join("tenants").display().to_string(),
            port: 0,
            database: "central".into(),
            username: String::new(),
            password: None,
            charset: "utf8".into(),
            collation: String::new(),
        }));
        let services = Arc::new(Services {
            storage,
            catalog,
            tenants: tenants.clone(),
            server: Arc::new(SqliteServer),
            runner: Arc::new(SystemRunner),
            tools: setup.tools,
            settings: Settings {
                temp_dir: tmp.path().join("scratch"),
                driver: setup.driver,
                protected_database: setup.protected.map(str::to_owned),
                tool_timeout: Duration::from_secs(30),
                rows_per_insert: None,
            },
        });
        Self {
            tmp,
            services,
            tenants,
        }
    }

    fn db_path(&self, database: &str) -> PathBuf {
        self.tmp.path().join("tenants").join(format!("{database}.sqlite"))
    }

    fn seed_widgets(&self, tenant: &Tenant) {
        std::fs::create_dir_all(self.tmp.path().join("tenants")).unwrap();
        let conn = Connection::open(self.db_path(&tenant.database)).unwrap();
        conn.execute_batch(
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL);
             CREATE INDEX widgets_name ON widgets(name);
             INSERT INTO widgets VALUES (1, 'bolt', 0.25), (2, 'nut', NULL), (3, 'gear', 12.5);",
        )
        .unwrap();
    }

    fn widgets(&self, tenant: &Tenant) -> Vec<(i64, String, Option<f64>)> {
        let conn = Connection::open(self.db_path(&tenant.database)).unwrap();
        let mut stmt = conn
            .prepare("SELECT id, name, price FROM widgets ORDER BY id")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn execute(&self, tenant: &Tenant, sql: &str) {
        Connection::open(self.db_path(&tenant.database))
            .unwrap()
            .execute_batch(sql)
            .unwrap();
    }

    fn backups(&self) -> BackupOrchestrator {
        BackupOrchestrator::new(self.services.clone(), AvailableMethods::default())
    }

    fn restores(&self) -> RestoreOrchestrator {
        RestoreOrchestrator::new(self.services.clone(), AvailableMethods::default())
    }

    async fn object(&self, record: &BackupRecord) -> Vec<u8> {
        self.services.storage.get_bytes(&record.path).await.unwrap()
    }

    fn object_file(&self, record: &BackupRecord) -> PathBuf {
        self.tmp.path().join("storage").join(&record.path)
    }

    fn scratch_is_empty(&self) -> bool {
        let dir = self.tmp.path().join("scratch");
        !dir.exists() || std::fs::read_dir(dir).unwrap().next().is_none()
    }
}

fn missing_tools() -> ToolPaths {
    ToolPaths {
        dump: PathBuf::from("/nonexistent/tenant-dump"),
        restore: PathBuf::from("/nonexistent/tenant-restore"),
    }
}

fn acme() -> Tenant {
    Tenant::new("acme", "tenant_acme").with_domain("Shop.Acme.com")
}

fn gunzip(bytes: &[u8]) -> String {
    let mut text = String::new();
    MultiGzDecoder::new(bytes).read_to_string(&mut text).unwrap();
    text
}

fn age(path: &Path, days: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(days * 86_400))
        .unwrap();
}

fn expected_widgets() -> Vec<(i64, String, Option<f64>)> {
    vec![
        (1, "bolt".into(), Some(0.25)),
        (2, "nut".into(), None),
        (3, "gear".into(), Some(12.5)),
    ]
}

#[tokio::test]
async fn native_compressed_backup_contains_one_multi_row_insert() {
    let h = Harness::new();
    let tenant = acme();
    h.seed_widgets(&tenant);

    let record = h
        .backups()
        .create_backup(
            &tenant,
            BackupOptions {
                method: Some(BackupMethod::Native),
                ..BackupOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(record.filename.starts_with("tenant_acme_shop_acme_com_"));
    assert!(record.filename.ends_with("_full_native.sql.gz"));
    assert_eq!(record.path, format!("backups/acme/{}", record.filename));
    assert_eq!(record.kind, BackupKind::Full);
    assert!(record.compressed);
    assert!(record.checksum.is_some());

    let sql = gunzip(&h.object(&record).await);
    assert_eq!(sql.matches("CREATE TABLE widgets").count(), 1);
    assert_eq!(sql.matches("INSERT INTO").count(), 1);
    assert!(sql.contains("INSERT INTO \"widgets\" VALUES\n(1,'bolt',0.25),\n(2,'nut',NULL),\n(3,'gear',12.5);\n"));
    assert!(sql.contains("CREATE INDEX widgets_name"));

    std::fs::remove_file(h.db_path(&tenant.database)).unwrap();
    let stats = h
        .restores()
        .restore(&tenant, &record, RestoreOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.tables, 1);
    assert_eq!(stats.rows, 3);
    assert_eq!(stats.method, BackupMethod::Native);
    assert_eq!(h.widgets(&tenant), expected_widgets());
    assert!(h.scratch_is_empty());
    assert_eq!(h.tenants.active(), 0);
}

#[tokio::test]
async fn structure_only_backup_restores_empty_tables() {
    let h = Harness::new();
    let tenant = acme();
    h.seed_widgets(&tenant);

    let record = h
        .backups()
        .create_backup(
            &tenant,
            BackupOptions {
                method: Some(BackupMethod::Native),
                compress: false,
                structure_only: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(record.kind, BackupKind::Structure);
    assert!(record.filename.ends_with("_structure_native.sql"));

    let sql = String::from_utf8(h.object(&record).await).unwrap();
    assert_eq!(sql.matches("CREATE TABLE").count(), 1);
    assert_eq!(sql.matches("INSERT").count(), 0);

    let stats = h
        .restores()
        .restore(&tenant, &record, RestoreOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.tables, 1);
    assert_eq!(stats.rows, 0);
    assert!(h.widgets(&tenant).is_empty());
}

#[tokio::test]
async fn protected_database_is_never_dropped() {
    let h = Harness::with(Setup {
        protected: Some("tenant_acme"),
        ..Setup::default()
    });
    let tenant = acme();
    h.seed_widgets(&tenant);

    let record = h
        .backups()
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap();

    let err = h
        .restores()
        .restore(&tenant, &record, RestoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::ProtectedDatabase(ref db) if db == "tenant_acme"));
    assert_eq!(h.widgets(&tenant), expected_widgets());
    assert!(h.scratch_is_empty());
    assert_eq!(h.tenants.active(), 0);
}

#[tokio::test]
async fn unqualified_backup_falls_back_to_native() {
    let h = Harness::new();
    let tenant = acme();
    h.seed_widgets(&tenant);

    let orchestrator = BackupOrchestrator::detect(h.services.clone()).await;
    assert!(!orchestrator.available().external_dump);
    assert_eq!(orchestrator.available().recommended(), BackupMethod::Native);

    let record = orchestrator
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap();
    assert_eq!(record.method, BackupMethod::Native);

    let err = orchestrator
        .create_backup(
            &tenant,
            BackupOptions {
                method: Some(BackupMethod::ExternalDump),
                ..BackupOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::UnsupportedMethod(BackupMethod::ExternalDump)));
    assert_eq!(h.services.catalog.list(&tenant.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn retention_deletes_only_expired_backups() {
    let h = Harness::new();
    let tenant = acme();
    let other = Tenant::new("globex", "tenant_globex");
    h.seed_widgets(&tenant);
    h.seed_widgets(&other);

    let backups = h.backups();
    let old = backups
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap();
    let fresh = backups
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap();
    let untouched = backups
        .create_backup(&other, BackupOptions::default())
        .await
        .unwrap();
    age(&h.object_file(&old), 40);

    let other_catalog = std::fs::read(h.tmp.path().join("storage/backups/globex/backups.json")).unwrap();

    let report = RetentionSweeper::new(h.services.clone())
        .cleanup_older_than(&[tenant.clone(), other.clone()], 30)
        .await
        .unwrap();

    assert_eq!(report.deleted_count(), 1);
    assert_eq!(report.tenants.len(), 1);
    assert_eq!(report.tenants[0].tenant, "acme");
    assert_eq!(report.tenants[0].deleted, vec![old.path.clone()]);
    assert_eq!(report.tenants[0].pruned_records, 1);

    assert!(!h.object_file(&old).exists());
    assert!(h.object_file(&fresh).exists());
    assert!(h.object_file(&untouched).exists());

    let remaining = h.services.catalog.list(&tenant.id).await.unwrap();
    assert_eq!(remaining, vec![fresh]);
    assert_eq!(
        std::fs::read(h.tmp.path().join("storage/backups/globex/backups.json")).unwrap(),
        other_catalog
    );

    let err = RetentionSweeper::new(h.services.clone())
        .cleanup_older_than(&[tenant], 0)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::InvalidRetention(0)));
}

#[tokio::test]
async fn every_native_variant_round_trips() {
    let h = Harness::new();
    let tenant = acme();
    h.seed_widgets(&tenant);

    for method in [BackupMethod::Native, BackupMethod::Portable] {
        for compress in [true, false] {
            let record = h
                .backups()
                .create_backup(
                    &tenant,
                    BackupOptions {
                        method: Some(method),
                        compress,
                        structure_only: false,
                    },
                )
                .await
                .unwrap();
            assert_eq!(record.compressed, compress);
            assert_eq!(record.method, method);

            h.execute(&tenant, "DELETE FROM widgets WHERE id = 1; CREATE TABLE scratch (x);");
            let stats = h
                .restores()
                .restore(&tenant, &record, RestoreOptions::default())
                .await
                .unwrap();
            assert_eq!((stats.tables, stats.rows), (1, 3), "{method} compress={compress}");
            assert_eq!(h.widgets(&tenant), expected_widgets());
        }
    }
}

#[tokio::test]
async fn listing_returns_every_backup_newest_first() {
    let h = Harness::new();
    let tenant = acme();
    h.seed_widgets(&tenant);

    let backups = h.backups();
    let mut created = Vec::new();
    for _ in 0..3 {
        created.push(
            backups
                .create_backup(&tenant, BackupOptions::default())
                .await
                .unwrap(),
        );
    }

    let listed = h.services.catalog.list(&tenant.id).await.unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    created.reverse();
    assert_eq!(listed, created);

    let mut names: Vec<_> = listed.iter().map(|r| r.filename.clone()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 3);
}

#[tokio::test]
async fn failed_backup_leaves_nothing_behind() {
    let h = Harness::new();
    let tenant = Tenant::new("ghost", "tenant_ghost");

    let err = h
        .backups()
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap_err();
    match err {
        BackupError::BackupFailed { tenant, source } => {
            assert_eq!(tenant, "ghost");
            assert!(matches!(*source, BackupError::Export(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.scratch_is_empty());
    assert!(h.services.catalog.list("ghost").await.unwrap().is_empty());
    assert!(h.services.storage.list("backups/ghost").await.unwrap().is_empty());
    assert_eq!(h.tenants.active(), 0);
}

#[tokio::test]
async fn corrupt_archive_aborts_before_drop() {
    let h = Harness::new();
    let tenant = acme();
    h.seed_widgets(&tenant);

    let path = "backups/acme/broken.sql.gz".to_owned();
    h.services
        .storage
        .put_bytes(&path, b"\x1f\x8b\x08\x00garbage")
        .await
        .unwrap();
    let record = BackupRecord {
        id: uuid::Uuid::new_v4(),
        filename: "broken.sql.gz".into(),
        path,
        size_bytes: 12,
        kind: BackupKind::Full,
        method: BackupMethod::Native,
        compressed: true,
        checksum: None,
        created_at: chrono::Utc::now(),
    };

    let err = h
        .restores()
        .restore(&tenant, &record, RestoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Decompression(_)));
    assert_eq!(h.widgets(&tenant), expected_widgets());
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn tampered_object_fails_checksum() {
    let h = Harness::new();
    let tenant = acme();
    h.seed_widgets(&tenant);

    let record = h
        .backups()
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap();
    std::fs::write(h.object_file(&record), b"tampered").unwrap();

    let err = h
        .restores()
        .restore(&tenant, &record, RestoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::IntegrityMismatch { .. }));
    assert_eq!(h.widgets(&tenant), expected_widgets());
}

#[tokio::test]
async fn restore_by_name_latest_and_with_safety_backup() {
    let h = Harness::new();
    let tenant = acme();
    h.seed_widgets(&tenant);

    let first = h
        .backups()
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap();
    h.execute(&tenant, "INSERT INTO widgets VALUES (4, 'spring', 1.0);");
    h.backups()
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap();

    let restores = h.restores();
    let stats = restores
        .restore_file(&tenant, &first.filename, RestoreOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.rows, 3);

    let stats = restores
        .restore_latest(&tenant, RestoreOptions { safety_backup: true })
        .await
        .unwrap();
    assert_eq!(stats.rows, 4);
    assert_eq!(h.services.catalog.list(&tenant.id).await.unwrap().len(), 3);

    let err = restores
        .restore_file(&tenant, "missing.sql.gz", RestoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::RecordNotFound(_)));

    let err = restores
        .restore_latest(&Tenant::new("globex", "tenant_globex"), RestoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::NoBackups(_)));
}

#[tokio::test]
async fn foreign_record_is_rejected() {
    let h = Harness::new();
    let tenant = acme();
    let other = Tenant::new("globex", "tenant_globex");
    h.seed_widgets(&tenant);
    h.seed_widgets(&other);

    let record = h
        .backups()
        .create_backup(&other, BackupOptions::default())
        .await
        .unwrap();
    let err = h
        .restores()
        .restore(&tenant, &record, RestoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::RecordNotFound(_)));
    assert_eq!(h.widgets(&tenant), expected_widgets());
}

#[tokio::test]
async fn batch_backup_reports_each_tenant() {
    let h = Harness::new();
    let acme = acme();
    let globex = Tenant::new("globex", "tenant_globex");
    h.seed_widgets(&acme);
    h.seed_widgets(&globex);

    let orchestrator = Arc::new(h.backups());
    let results = orchestrator
        .create_backups(
            vec![globex, Tenant::new("ghost", "tenant_ghost"), acme],
            BackupOptions::default(),
            2,
        )
        .await;

    let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["acme", "ghost", "globex"]);
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(BackupError::BackupFailed { .. })));
    assert!(results[2].1.is_ok());
    assert_eq!(h.tenants.active(), 0);
}

#[tokio::test]
async fn sqlite_catalog_tracks_backups() {
    let h = Harness::with(Setup {
        sqlite_catalog: true,
        ..Setup::default()
    });
    let tenant = acme();
    h.seed_widgets(&tenant);

    let record = h
        .backups()
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap();
    assert_eq!(h.services.catalog.list(&tenant.id).await.unwrap(), vec![record.clone()]);
    assert!(!h.tmp.path().join("storage/backups/acme/backups.json").exists());

    h.restores()
        .restore_file(&tenant, &record.filename, RestoreOptions::default())
        .await
        .unwrap();
    assert_eq!(h.widgets(&tenant), expected_widgets());
}

#[tokio::test]
async fn external_tool_round_trip_when_installed() {
    let h = Harness::with(Setup {
        tools: ToolPaths {
            dump: PathBuf::from("sqlite3"),
            restore: PathBuf::from("sqlite3"),
        },
        ..Setup::default()
    });
    let tenant = acme();
    h.seed_widgets(&tenant);

    let backups = BackupOrchestrator::detect(h.services.clone()).await;
    if !backups.available().external_dump {
        eprintln!("sqlite3 not installed; skipping");
        return;
    }

    let record = backups
        .create_backup(
            &tenant,
            BackupOptions {
                method: Some(BackupMethod::ExternalDump),
                ..BackupOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(record.filename.ends_with("_full_external.sql.gz"));

    h.execute(&tenant, "DELETE FROM widgets;");
    let stats = RestoreOrchestrator::detect(h.services.clone())
        .await
        .restore(&tenant, &record, RestoreOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.method, BackupMethod::ExternalDump);
    assert_eq!(stats.statements, 0);
    assert_eq!(h.widgets(&tenant), expected_widgets());
}

#[tokio::test]
async fn external_dump_replays_in_process_without_restore_binary() {
    let h = Harness::with(Setup {
        tools: ToolPaths {
            dump: PathBuf::from("sqlite3"),
            restore: PathBuf::from("/nonexistent/tenant-restore"),
        },
        ..Setup::default()
    });
    let tenant = acme();
    h.seed_widgets(&tenant);

    let backups = BackupOrchestrator::detect(h.services.clone()).await;
    if !backups.available().external_dump {
        eprintln!("sqlite3 not installed; skipping");
        return;
    }
    assert!(!backups.available().external_restore);

    let record = backups
        .create_backup(
            &tenant,
            BackupOptions {
                method: Some(BackupMethod::ExternalDump),
                ..BackupOptions::default()
            },
        )
        .await
        .unwrap();

    let stats = RestoreOrchestrator::detect(h.services.clone())
        .await
        .restore(&tenant, &record, RestoreOptions::default())
        .await
        .unwrap();
    assert!(stats.statements > 0);
    assert_eq!(h.widgets(&tenant), expected_widgets());
}

#[tokio::test]
async fn concurrent_backups_of_one_tenant_keep_every_object() {
    let h = Harness::new();
    let tenant = acme();
    h.seed_widgets(&tenant);

    let backups = Arc::new(h.backups());
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let backups = backups.clone();
        let tenant = tenant.clone();
        tasks.spawn(async move {
            backups
                .create_backup(
                    &tenant,
                    BackupOptions {
                        method: Some(BackupMethod::Native),
                        compress: false,
                        ..BackupOptions::default()
                    },
                )
                .await
        });
    }
    let mut records = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        records.push(joined.unwrap().unwrap());
    }

    let paths: HashSet<&str> = records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths.len(), 4);
    assert_eq!(h.services.storage.list("backups/acme").await.unwrap().len(), 5);
    assert_eq!(h.services.catalog.list(&tenant.id).await.unwrap().len(), 4);
    assert_eq!(h.tenants.active(), 0);

    let restores = h.restores();
    for record in &records {
        assert!(record.filename.starts_with("tenant_acme_shop_acme_com_"));
        assert!(record.filename.contains("_full_native"));
        assert!(record.filename.ends_with(".sql"));
        h.execute(&tenant, "DELETE FROM widgets;");
        restores
            .restore_file(&tenant, &record.filename, RestoreOptions::default())
            .await
            .unwrap();
        assert_eq!(h.widgets(&tenant), expected_widgets());
    }
}

#[tokio::test]
async fn invalid_utf8_text_and_views_survive_native_round_trip() {
    let h = Harness::new();
    let tenant = acme();
    h.seed_widgets(&tenant);
    h.execute(
        &tenant,
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
         INSERT INTO notes VALUES (1, CAST(X'41FF42' AS TEXT)), (2, 'plain');
         CREATE VIEW cheap_widgets AS SELECT id, name FROM widgets WHERE price < 1;",
    );

    for method in [BackupMethod::Native, BackupMethod::Portable] {
        let record = h
            .backups()
            .create_backup(
                &tenant,
                BackupOptions {
                    method: Some(method),
                    ..BackupOptions::default()
                },
            )
            .await
            .unwrap();

        std::fs::remove_file(h.db_path(&tenant.database)).unwrap();
        let stats = h
            .restores()
            .restore(&tenant, &record, RestoreOptions::default())
            .await
            .unwrap();
        assert_eq!(stats.tables, 2);
        assert_eq!(stats.rows, 5);

        let conn = Connection::open(h.db_path(&tenant.database)).unwrap();
        let (hex, kind): (String, String) = conn
            .query_row("SELECT hex(body), typeof(body) FROM notes WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!((hex.as_str(), kind.as_str()), ("41FF42", "text"));
        let cheap: String = conn
            .query_row("SELECT name FROM cheap_widgets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(cheap, "bolt");
    }
}

#[tokio::test]
async fn mysql_without_client_tools_offers_no_method() {
    let h = Harness::with(Setup {
        driver: Driver::MySql,
        ..Setup::default()
    });
    let tenant = acme();

    let backups = BackupOrchestrator::detect(h.services.clone()).await;
    assert!(!backups.available().native);
    assert!(backups.available().methods().is_empty());

    let err = backups
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::UnsupportedMethod(BackupMethod::Native)));
    assert_eq!(h.tenants.active(), 0);
    assert!(h.services.catalog.list(&tenant.id).await.unwrap().is_empty());

    let record = NewBackupRecord {
        filename: "tenant_acme_shop_acme_com_2026-01-01_00-00-00_full_native.sql.gz".into(),
        path: "backups/acme/tenant_acme_shop_acme_com_2026-01-01_00-00-00_full_native.sql.gz".into(),
        size_bytes: 10,
        kind: BackupKind::Full,
        method: BackupMethod::Native,
        compressed: true,
        checksum: None,
        created_at: Utc::now(),
    }
    .into_record();
    let err = RestoreOrchestrator::detect(h.services.clone())
        .await
        .restore(&tenant, &record, RestoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::UnsupportedMethod(BackupMethod::Native)));
    assert!(h.scratch_is_empty());
    assert_eq!(h.tenants.active(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn mysql_with_client_tools_offers_only_external_dump() {
    let h = Harness::with(Setup {
        driver: Driver::MySql,
        tools: ToolPaths {
            dump: PathBuf::from("true"),
            restore: PathBuf::from("true"),
        },
        ..Setup::default()
    });
    let available = BackupOrchestrator::detect(h.services.clone()).await.available();
    assert_eq!(available.methods(), vec![BackupMethod::ExternalDump]);
    assert_eq!(available.recommended(), BackupMethod::ExternalDump);
}

#[tokio::test]
async fn restore_refused_without_protected_database() {
    let h = Harness::with(Setup {
        protected: None,
        ..Setup::default()
    });
    let tenant = acme();
    h.seed_widgets(&tenant);

    let record = h
        .backups()
        .create_backup(&tenant, BackupOptions::default())
        .await
        .unwrap();
    h.execute(&tenant, "INSERT INTO widgets VALUES (4, 'spring', 1.0);");

    let err = h
        .restores()
        .restore(&tenant, &record, RestoreOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::ProtectedDatabaseUnset));
    assert_eq!(h.widgets(&tenant).len(), 4);
    assert!(h.scratch_is_empty());
    assert_eq!(h.tenants.active(), 0);
}

/// Local storage whose delete fails for one chosen key.
struct StuckDelete {
    inner: LocalStorage,
    stuck: Arc<Mutex<Option<String>>>,
}

#[async_trait::async_trait]
impl StorageBackend for StuckDelete {
    async fn put_file(&self, key: &str, source: &Path) -> Result<u64, StorageError> {
        self.inner.put_file(key, source).await
    }

    async fn put_file_new(&self, key: &str, source: &Path) -> Result<u64, StorageError> {
        self.inner.put_file_new(key, source).await
    }

    async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.inner.put_bytes(key, bytes).await
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<u64, StorageError> {
        self.inner.get_to_file(key, dest).await
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get_bytes(key).await
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        self.inner.size(key).await
    }

    async fn last_modified(&self, key: &str) -> Result<DateTime<Utc>, StorageError> {
        self.inner.last_modified(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if self.stuck.lock().unwrap().as_deref() == Some(key) {
            return Err(StorageError::Io {
                key: key.to_owned(),
                source: std::io::Error::other("permission denied"),
            });
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }

    async fn make_directory(&self, key: &str) -> Result<(), StorageError> {
        self.inner.make_directory(key).await
    }
}

#[tokio::test]
async fn failed_delete_still_prunes_what_was_removed() {
    let stuck = Arc::new(Mutex::new(None));
    let h = Harness::with(Setup {
        storage: Some(Box::new({
            let stuck = stuck.clone();
            move |inner| Arc::new(StuckDelete { inner, stuck }) as Arc<dyn StorageBackend>
        })),
        ..Setup::default()
    });
    let tenant = acme();
    h.seed_widgets(&tenant);

    let backups = h.backups();
    let mut records = Vec::new();
    for _ in 0..3 {
        let record = backups
            .create_backup(&tenant, BackupOptions::default())
            .await
            .unwrap();
        age(&h.object_file(&record), 40);
        records.push(record);
    }
    let mut keys: Vec<String> = records.iter().map(|r| r.path.clone()).collect();
    keys.sort();
    *stuck.lock().unwrap() = Some(keys[1].clone());

    let err = RetentionSweeper::new(h.services.clone())
        .cleanup_older_than(&[tenant.clone()], 30)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Storage(StorageError::Io { ref key, .. }) if key == &keys[1]));

    let remaining: Vec<String> = h
        .services
        .catalog
        .list(&tenant.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert_eq!(remaining.len(), 2);
    assert!(!remaining.contains(&keys[0]));
    assert!(remaining.contains(&keys[1]));
    assert!(remaining.contains(&keys[2]));
    assert!(!h.services.storage.exists(&keys[0]).await.unwrap());
    assert!(h.services.storage.exists(&keys[1]).await.unwrap());
}
