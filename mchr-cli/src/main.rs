//! `mchr`: replicates a set of MySQL databases into ClickHouse, row by row.
//!
//! Subcommands: `run` (default) starts replication for every configured
//! database as its own task; `status` prints one database's persisted
//! phase and cursor without touching the network.

mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{Config, DatabaseConfig};
use mchr_core::{log_database_failure, Orchestrator, StateStore};
use mchr_errors::ReplicationResult;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mchr", about = "Replicates MySQL databases into ClickHouse, row by row")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "MCHR_CONFIG", default_value = "mchr.toml")]
    config: PathBuf,

    /// Override the tracing filter (otherwise `RUST_LOG`, default `info`).
    #[arg(long, env = "MCHR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Restrict to one configured database's `source` name.
    #[arg(long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start replication for the selected databases (the default).
    Run,
    /// Print a database's persisted phase and cursor without starting replication.
    Status {
        /// Database to inspect; falls back to `--database`.
        database: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, cli.database).await,
        Command::Status { database } => {
            let database = database
                .or(cli.database)
                .context("`status` needs a database name: pass it positionally or via --database")?;
            status(&config, &database)
        }
    }
}

fn init_logging(level: Option<&str>) {
    let filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
        tracing::warn!(error = %err, "failed to install prometheus exporter, metrics will be recorded but not served");
    }
}

async fn run(config: Config, only_database: Option<String>) -> anyhow::Result<()> {
    let databases: Vec<DatabaseConfig> = config
        .databases
        .iter()
        .filter(|db| only_database.as_deref().map_or(true, |want| want == db.source))
        .cloned()
        .collect();
    if databases.is_empty() {
        anyhow::bail!("no configured database matches --database (or none are configured at all)");
    }

    let mut tasks = tokio::task::JoinSet::new();
    for db in databases {
        let config = config.clone();
        tasks.spawn(async move {
            let database = db.source.clone();
            let result = replicate_database(&config, &db).await;
            (database, result)
        });
    }

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, exiting");
            Ok(())
        }
        Some(joined) = tasks.join_next() => {
            let (database, result) = joined.context("replication task panicked")?;
            match result {
                // The realtime loop runs until an error or the shutdown
                // signal above, so a clean exit here is unexpected but
                // not unsound; report it rather than asserting it away.
                Ok(()) => {
                    tracing::warn!(database, "replication task exited without an error");
                    Ok(())
                }
                Err(err) => {
                    log_database_failure(&database, &err);
                    Err(anyhow::anyhow!("database `{database}` replication failed: {err}"))
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn replicate_database(config: &Config, db: &DatabaseConfig) -> ReplicationResult<()> {
    let span = tracing::info_span!("replicator", database = %db.source);
    let _enter = span.enter();

    let state_path = config.state_path(&db.source);
    if let Some(parent) = state_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut orchestrator = Orchestrator::new(db.source.clone(), state_path, config.orchestrator_config())?;

    let source = mchr_source_mysql::MySqlSourceClient::connect(
        config.mysql_opts(&db.source),
        db.source.clone(),
    )
    .await?;

    let target = mchr_target_clickhouse::ClickHouseTargetClient::new(
        &config.clickhouse_url(),
        &config.clickhouse.user,
        &config.clickhouse.password,
        config.target_database_name(db),
    );

    let binlog_reader = mchr_binlog::MySqlBinlogReader::connect(
        config.mysql_opts(&db.source),
        config.binlog_reader.server_id,
    )
    .await?;

    orchestrator
        .run(Box::new(source), Box::new(target), Box::new(binlog_reader))
        .await
}

fn status(config: &Config, database: &str) -> anyhow::Result<()> {
    let state_path = config.state_path(database);
    let store = StateStore::load(&state_path)
        .with_context(|| format!("reading state file at {}", state_path.display()))?;

    println!("database: {database}");
    println!("phase: {:?}", store.state.phase);
    println!("last_processed_transaction: {:?}", store.state.last_processed_transaction);
    println!("tables: {}", store.state.tables.join(", "));
    Ok(())
}
