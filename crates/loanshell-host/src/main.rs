//! Loanshell host
//!
//! Drives the offline worker from the command line: one JSON event per line
//! on stdin, one JSON outcome per line on stdout. Logs go to stderr.

mod host;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use loanshell_common::{init_logging, LogConfig, LogFormat};
use loanshell_net::HttpFetcher;
use loanshell_sw::{MemoryRegistry, Registry, ServiceWorker, SqliteRegistry, WorkerConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::host::Host;

/// Offline cache manager for the Family Loan Tracker
#[derive(Parser, Debug)]
#[command(name = "loanshell")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Worker configuration file (JSON)
    #[arg(short, long, env = "LOANSHELL_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database for cache generations
    #[arg(long, env = "LOANSHELL_DB", conflicts_with = "persist")]
    db: Option<PathBuf>,

    /// Store cache generations in the platform data directory
    #[arg(long)]
    persist: bool,

    /// Write the default configuration to this path and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format))
        .context("failed to initialize logging")?;

    if let Some(path) = cli.write_config {
        WorkerConfig::default()
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote default configuration");
        return Ok(());
    }

    let config = match cli.config {
        Some(ref path) => WorkerConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => WorkerConfig::default(),
    };

    let registry = open_registry(cli.db, cli.persist)?;
    let fetcher = Arc::new(
        HttpFetcher::new(config.fetcher_config()).context("failed to build HTTP client")?,
    );
    let worker = ServiceWorker::new(config, registry, fetcher).context("invalid configuration")?;
    if worker.resume().await.context("failed to read stored generations")? {
        info!(state = ?worker.state(), "Serving from stored shell generation");
    }
    let host = Host::new(worker);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let output = host.handle_line(&line).await;
        let mut encoded = serde_json::to_vec(&output)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }

    debug!("Input closed; shutting down");
    Ok(())
}

fn open_registry(db: Option<PathBuf>, persist: bool) -> Result<Arc<dyn Registry>> {
    let path = match (db, persist) {
        (Some(path), _) => Some(path),
        (None, true) => Some(default_db_path()?),
        (None, false) => None,
    };

    match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            info!(path = %path.display(), "Using SQLite registry");
            Ok(Arc::new(SqliteRegistry::open_path(&path)?))
        }
        None => {
            info!("Using in-memory registry");
            Ok(Arc::new(MemoryRegistry::new()))
        }
    }
}

fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("no local data directory on this platform")?;
    Ok(base.join("loanshell").join("caches.db"))
}
