//! glimpse-agent — one-shot system statistics collector.
//!
//! Performs a single collection pass over every available resource type and
//! exits; an external scheduler (typically cron) invokes it once per
//! refresh interval. Invocations must not overlap — each series has exactly
//! one writer.

mod config;
mod error;
mod probe;
mod resource;

use std::path::PathBuf;
use std::time::SystemTime;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{AgentConfig, SettingsFile};
use crate::resource::Resource;

/// glimpse-agent — record one round of system statistics.
#[derive(Parser)]
#[command(name = "glimpse-agent", version, about)]
struct Cli {
    /// Base directory for the round-robin stores.
    #[arg(long)]
    data: PathBuf,

    /// Refresh interval in minutes; must match the scheduler's cadence and
    /// the stores' step exactly.
    #[arg(long, default_value = "5")]
    refresh: u64,

    /// Optional JSON settings file (exclusions, archive ladder).
    #[arg(long)]
    config: Option<PathBuf>,

    /// upsd endpoint for UPS statistics.
    #[arg(long, default_value = "localhost:3493")]
    upsd: String,

    /// Skip UPS collection entirely.
    #[arg(long)]
    no_ups: bool,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Err(e) = run(cli) {
        tracing::error!("collection run failed: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AgentConfig::new(cli.data, cli.refresh)?;
    if let Some(path) = &cli.config {
        config.apply_settings(SettingsFile::load(path)?)?;
    }
    config.upsd_addr = if cli.no_ups { None } else { Some(cli.upsd) };

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)?
        .as_secs();

    let mut resources = Resource::start_all(&config);
    if resources.is_empty() {
        return Err("no resource type could be started".into());
    }

    let mut collected = 0usize;
    for resource in &mut resources {
        let info = resource.describe();
        match resource.collect(&config, now) {
            Ok(entities) => {
                tracing::debug!(
                    resource = info.name,
                    entities,
                    "collected {}",
                    info.description
                );
                collected += 1;
            }
            // One failing resource type must not take its siblings down.
            Err(e) => {
                tracing::warn!(resource = info.name, error = %e, "collection failed");
            }
        }
    }

    if collected == 0 {
        return Err("every resource type failed this cycle".into());
    }

    tracing::info!(
        resources = collected,
        total = resources.len(),
        "collection pass complete"
    );
    Ok(())
}
