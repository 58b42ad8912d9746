//! focusd - compliance watcher
//!
//! Keeps the managed policy files in place. Started detached by
//! `focusctl enable` and, under a different name, by every service replica.

use anyhow::{Context, Result};
use clap::Parser;
use focus_common::{FocusConfig, PolicyDocument};
use focusd::process_name::set_process_name;
use focusd::ComplianceDaemon;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "focusd")]
#[command(version, about = "Keeps managed policy files in place", long_about = None)]
struct Args {
    /// Name to run under
    #[arg(long)]
    name: Option<String>,

    /// Config file (defaults to /etc/focusd/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sync managed files once and exit
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Some(name) = &args.name {
        if let Err(e) = set_process_name(name) {
            warn!("Failed to set process name: {}", e);
        }
    }

    let config = match &args.config {
        Some(path) => FocusConfig::load_from(path),
        None => FocusConfig::load(),
    }
    .context("Failed to load configuration")?;

    let document = PolicyDocument::from_config(&config).context("Failed to build policy")?;
    let mut daemon = ComplianceDaemon::new(&document, config.daemon.grace_period())?;

    if args.once {
        daemon.sync_all();
        return Ok(());
    }

    info!("focusd v{} starting (pid {})", env!("CARGO_PKG_VERSION"), std::process::id());

    // Never set: the process runs until signalled
    let shutdown = AtomicBool::new(false);
    daemon.run(&shutdown)
}
