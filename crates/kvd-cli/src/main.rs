//! kvdistlead
//!
//! Runs one leader among many identical instances, arbitrated by a lease key
//! in Redis.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

mod config;
mod duty;

use config::{AppConfig, ConfigArgs};
use duty::LoggingDuty;
use kvd_core::leadership::{ElectionLoop, RedisLeaseStore};
use kvd_observability::{describe_leadership_metrics, init_logging_with_config, LoggingConfig};

#[derive(Parser)]
#[command(name = "kvdistlead")]
#[command(version)]
#[command(about = "K/V distributed leader election", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print the effective configuration (secrets redacted) and exit
    #[arg(long)]
    print_config: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing, so env-backed flags see the file's values
    let env_file = config::load_env_file();
    let cli = Cli::parse();

    let config = AppConfig::from_args(&cli.config).context("Invalid configuration")?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config.redact_secrets())?);
        return Ok(());
    }

    init_logging_with_config(logging_config(cli.log_format, cli.verbose));
    describe_leadership_metrics();
    if let Some(path) = env_file {
        debug!(path = %path.display(), "Loaded environment file");
    }

    run(config).await
}

fn logging_config(format: LogFormat, verbose: bool) -> LoggingConfig {
    match (format, verbose) {
        (LogFormat::Json, false) => LoggingConfig::production(),
        (LogFormat::Text, false) => LoggingConfig::default(),
        (format, true) => {
            LoggingConfig::development().with_json_format(format == LogFormat::Json)
        }
    }
}

/// Runs the election loop until SIGINT or SIGTERM.
async fn run(config: AppConfig) -> Result<()> {
    println!("{} Starting kvdistlead...", "[kvdistlead]".cyan());
    println!("  {} Instance: {}", "→".green(), config.election.instance_id);
    println!("  {} Lease key: {}", "→".green(), config.election.lock_key);
    println!(
        "  {} Redis: {}:{}/{}",
        "→".green(),
        config.redis.host,
        config.redis.port,
        config.redis.db
    );

    let store = RedisLeaseStore::new(config.redis.clone())
        .context("Failed to create Redis lease store")?;
    if let Err(e) = store.ping().await {
        // Not fatal: the loop stays on standby until the store answers
        warn!(error = %e, "Redis is not reachable yet");
    }

    let duty = Arc::new(LoggingDuty::new(config.election.instance_id.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let election = tokio::spawn(
        ElectionLoop::new(config.election, Arc::new(store), duty).run(shutdown_rx),
    );

    shutdown_signal().await?;
    println!("\n{}", "Shutting down...".yellow());

    // The loop may already have exited; nothing else listens on the channel
    let _ = shutdown_tx.send(true);
    let machine = election.await.context("Election loop task failed")?;

    let stats = machine.stats();
    info!(
        elections_won = stats.elections_won,
        elections_lost = stats.elections_lost,
        renewals_successful = stats.renewals_successful,
        renewals_failed = stats.renewals_failed,
        total_leadership_seconds = stats.total_leadership_seconds,
        "kvdistlead stopped"
    );
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to install Ctrl+C handler")?;
                info!("Received Ctrl+C, initiating shutdown");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")?;
        info!("Received Ctrl+C, initiating shutdown");
    }

    Ok(())
}
