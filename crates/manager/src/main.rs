use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tenant_backup_core::{BackupMethod, Tenant};
use tenant_backup_manager::config::{self, Config};
use tenant_backup_manager::{
    BackupOptions, BackupOrchestrator, RestoreOptions, RestoreOrchestrator, RetentionSweeper,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tenant-backup")]
#[command(version, about = "Per-tenant database backup and restore", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Back up one tenant, or every configured tenant with --all
    CreateBackup {
        /// Tenant id
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        tenant: Option<String>,

        #[arg(long)]
        all: bool,

        /// external, native or portable; defaults to the best available
        #[arg(long)]
        method: Option<BackupMethod>,

        #[arg(long)]
        no_compress: bool,

        /// Schema only, no row data
        #[arg(long)]
        structure_only: bool,

        /// Parallel backups when running with --all
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Replace a tenant's database with a stored backup
    Restore {
        tenant: String,

        /// Backup filename as shown by `list`
        #[arg(required_unless_present = "latest", conflicts_with = "latest")]
        filename: Option<String>,

        /// Restore the newest backup
        #[arg(long)]
        latest: bool,

        /// Back up the current database before replacing it
        #[arg(long)]
        safety_backup: bool,
    },

    /// Show a tenant's cataloged backups, newest first
    List {
        tenant: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete backups older than the retention period
    Cleanup {
        /// Overrides the configured retention period
        #[arg(long)]
        days: Option<i64>,

        /// Limit to one tenant
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Show which backup methods this environment supports
    Methods,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(path)?
        }
        None => Config::default(),
    };
    let runtime = cfg.resolve(|key| env::var(key).ok())?;
    let services = Arc::new(runtime.services()?);

    match cli.command {
        Command::CreateBackup {
            tenant,
            all,
            method,
            no_compress,
            structure_only,
            concurrency,
        } => {
            let options = BackupOptions {
                method,
                compress: !no_compress,
                structure_only,
            };
            let orchestrator = Arc::new(BackupOrchestrator::detect(services).await);
            if all {
                let results = orchestrator
                    .create_backups(
                        runtime.tenants.clone(),
                        options,
                        concurrency.unwrap_or(runtime.concurrency),
                    )
                    .await;
                let mut failed = 0;
                for (tenant, result) in results {
                    match result {
                        Ok(record) => println!("{tenant}\t{}", record.filename),
                        Err(e) => {
                            failed += 1;
                            error!(tenant = %tenant, error = %e, "backup failed");
                        }
                    }
                }
                if failed > 0 {
                    bail!("{failed} tenant backup(s) failed");
                }
            } else {
                let tenant = lookup(&runtime, tenant.as_deref())?;
                let record = orchestrator.create_backup(tenant, options).await?;
                println!("{}", record.filename);
            }
        }
        Command::Restore {
            tenant,
            filename,
            latest,
            safety_backup,
        } => {
            let tenant = runtime.tenant(&tenant)?;
            let options = RestoreOptions { safety_backup };
            let orchestrator = RestoreOrchestrator::detect(services).await;
            let stats = match filename {
                Some(filename) if !latest => orchestrator.restore_file(tenant, &filename, options).await?,
                _ => orchestrator.restore_latest(tenant, options).await?,
            };
            println!(
                "restored {} table(s), {} row(s) via {} in {} ms",
                stats.tables, stats.rows, stats.method, stats.duration_ms
            );
        }
        Command::List { tenant, json } => {
            let tenant = runtime.tenant(&tenant)?;
            let records = services.catalog.list(&tenant.id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in records {
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        record.created_at.to_rfc3339(),
                        record.kind.as_str(),
                        record.method,
                        record.size_bytes,
                        record.filename
                    );
                }
            }
        }
        Command::Cleanup { days, tenant } => {
            let tenants: Vec<Tenant> = match tenant {
                Some(id) => vec![runtime.tenant(&id)?.clone()],
                None => runtime.tenants.clone(),
            };
            let days = days.unwrap_or(runtime.retention_days);
            let report = RetentionSweeper::new(services)
                .cleanup_older_than(&tenants, days)
                .await
                .context("retention cleanup")?;
            info!(removed = report.deleted_count(), retention_days = days, "cleanup finished");
            for entry in report.tenants {
                for key in entry.deleted {
                    println!("{}\t{key}", entry.tenant);
                }
            }
        }
        Command::Methods => {
            let available = services.detect_methods().await;
            for method in available.methods() {
                println!("{method}");
            }
            let recommended = available.recommended();
            if available.contains(recommended) {
                println!("recommended: {recommended}");
            } else {
                println!("recommended: none (no usable method for {})", runtime.settings.driver);
            }
            println!(
                "external restore: {}",
                if available.external_restore { "available" } else { "unavailable" }
            );
        }
    }
    Ok(())
}

fn lookup<'a>(runtime: &'a config::RuntimeConfig, id: Option<&str>) -> Result<&'a Tenant> {
    match id {
        Some(id) => runtime.tenant(id),
        None => bail!("a tenant id or --all is required"),
    }
}
