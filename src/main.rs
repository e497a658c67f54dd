use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use feeddeck::cache::{RefreshCoordinator, SnapshotStore, SweepOutcome};
use feeddeck::config::Config;

#[derive(Parser, Debug)]
#[command(name = "feeddeck", about = "Feed aggregation core with a staleness-driven snapshot cache")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, value_name = "FILE", default_value = "feeddeck.toml")]
    config: PathBuf,

    /// Path to the snapshot store database
    #[arg(long, value_name = "FILE", default_value = "feeddeck.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the snapshot (the read operation), printing JSON to stdout
    Fetch {
        /// Bypass the cache and fetch synchronously
        #[arg(long)]
        force: bool,
        /// Wrap the snapshot with cache metadata instead of returning it bare
        #[arg(long)]
        include_cache: bool,
    },
    /// Run the periodic sweep, once or on a timer
    Sweep {
        /// Repeat every N seconds instead of running once
        #[arg(long, value_name = "SECS")]
        interval_secs: Option<u64>,
    },
    /// Administrative refresh (requires the configured admin key)
    Refresh {
        /// Shared-secret key, matched exactly against the configured secret
        #[arg(long)]
        key: String,
        /// Delete the cached snapshot before refreshing
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let db_path = args
        .db
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let store = SnapshotStore::open(db_path)
        .await
        .with_context(|| format!("Failed to open snapshot store at {db_path}"))?;

    let coordinator = RefreshCoordinator::new(store, &config);

    match args.command {
        Command::Fetch {
            force,
            include_cache,
        } => {
            let outcome = coordinator.read(force).await?;
            let json = if include_cache {
                serde_json::to_string_pretty(&outcome)?
            } else {
                serde_json::to_string_pretty(&outcome.results)?
            };
            println!("{json}");
        }
        Command::Sweep { interval_secs } => match interval_secs {
            None => report_sweep(coordinator.sweep().await?),
            Some(secs) => {
                let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
                loop {
                    ticker.tick().await;
                    match coordinator.sweep().await {
                        Ok(outcome) => report_sweep(outcome),
                        // A failed pass is logged; the timer keeps going.
                        Err(e) => tracing::error!(error = %e, "Sweep failed"),
                    }
                }
            }
        },
        Command::Refresh { key, clear } => {
            let report = coordinator.admin_refresh(&key, clear).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn report_sweep(outcome: SweepOutcome) {
    match outcome {
        SweepOutcome::Skipped { age_secs } => {
            tracing::info!(age_secs = age_secs, "Sweep skipped, snapshot still fresh")
        }
        SweepOutcome::Refreshed { sources } => {
            tracing::info!(sources = sources, "Sweep refreshed snapshot")
        }
    }
}
