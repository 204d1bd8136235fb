use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cutoff_storage::{AdmissionStore, PgAdmissionStore};
use cutoff_sync::{maybe_build_scheduler, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "cutoff-cli")]
#[command(about = "Specialization cutoff sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile both sources into storage once and print the outcome.
    Sync,
    Migrate,
    /// Show the most recent run audit row.
    Status,
    /// Run on CUTOFF_SYNC_CRON until Ctrl-C.
    Watch,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_json = std::env::var("CUTOFF_LOG_JSON")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false);
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn connect(config: &SyncConfig) -> Result<PgAdmissionStore> {
    PgAdmissionStore::connect(&config.database_url, config.db_timeout())
        .await
        .context("connecting to database")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let pipeline = SyncPipeline::from_config(&config)?;
            let store = connect(&config).await?;
            let outcome = pipeline.run_once(&store).await;
            store.close().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if outcome.is_failed() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Migrate => {
            let store = connect(&config).await?;
            let migrated = store.migrate().await;
            store.close().await;
            migrated.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Status => {
            let store = connect(&config).await?;
            let latest = store.latest_run().await;
            store.close().await;
            match latest.context("reading run metadata")? {
                Some(run) => println!("{}", serde_json::to_string_pretty(&run)?),
                None => println!("no runs recorded"),
            }
        }
        Commands::Watch => {
            let pipeline = Arc::new(SyncPipeline::from_config(&config)?);
            let store = Arc::new(connect(&config).await?);
            let shared: Arc<dyn AdmissionStore> = store.clone();
            let Some(mut sched) = maybe_build_scheduler(&config, pipeline, shared).await? else {
                bail!("scheduler disabled; set CUTOFF_SCHEDULER_ENABLED=true to watch");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "scheduler started; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
            store.close().await;
        }
    }

    Ok(ExitCode::SUCCESS)
}
