//! focusctl - turn focus mode on and off
//!
//! `enable` writes the browser policy and starts the watchers. `disable`
//! makes you type a quote by hand first. `status` shows what is running.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use focus_common::{DetachedSpawner, FocusConfig, Systemd};
use focusctl::commands::Focus;
use focusctl::display;
use focusctl::gate::DisableGate;
use focusctl::quote::{HttpQuoteSource, OfflineQuotes, QuoteSource};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::thread;
use tracing::warn;

#[derive(Parser)]
#[command(name = "focusctl")]
#[command(version, about = "Self-imposed distraction blocker", long_about = None)]
struct Cli {
    /// Config file (defaults to /etc/focusd/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the policy and start enforcement
    Enable,

    /// Stop enforcement after typing a quote
    Disable {
        /// Re-enable automatically after this many minutes (1-60)
        #[arg(long, allow_negative_numbers = true)]
        duration: Option<i64>,
    },

    /// Show enforcement state
    Status,

    /// Register the watch binary as persistent services
    Publish {
        /// Binary to install (defaults to focusd next to focusctl)
        #[arg(long)]
        bin_path: Option<PathBuf>,

        /// Number of services to keep registered
        #[arg(long)]
        count: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => FocusConfig::load_from(path),
        None => FocusConfig::load(),
    };
    let config = match (loaded, &cli.command) {
        (Ok(config), _) => config,
        // status is read-only and always succeeds
        (Err(e), Commands::Status) => {
            warn!("Failed to load configuration: {}", e);
            display::print_status_unknown(&e.to_string());
            return Ok(());
        }
        (Err(e), _) => return Err(e).context("Failed to load configuration"),
    };

    let manager = Systemd::new(config.replicas.unit_dir.clone());
    let spawner = DetachedSpawner {
        binary: config.daemon.binary_path(),
        config_path: cli.config.clone(),
    };
    let focus = Focus::new(&config, &manager, &spawner);

    match cli.command {
        Commands::Enable => {
            let report = focus.enable().context("Failed to enable focus mode")?;
            display::print_enable(&report);
        }
        Commands::Disable { duration } => disable(&focus, &config, duration)?,
        Commands::Status => display::print_status(&focus.status()),
        Commands::Publish { bin_path, count } => {
            let binary = bin_path.unwrap_or_else(|| config.daemon.binary_path());
            let count = count.unwrap_or(config.replicas.count);
            let report = focus
                .publish(&binary, count)
                .context("Failed to publish replicas")?;
            display::print_publish(&report);
        }
    }
    Ok(())
}

fn disable(focus: &Focus<'_>, config: &FocusConfig, minutes: Option<i64>) -> Result<()> {
    let remote = match HttpQuoteSource::new(&config.quote) {
        Ok(source) => Some(source),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };
    let source: &dyn QuoteSource = match &remote {
        Some(source) => source,
        None => &OfflineQuotes,
    };
    let gate = DisableGate::new(&config.quote, source);

    let result = focus
        .disable(minutes, |duration| gate.challenge(duration))
        .context("Failed to disable focus mode")?;
    display::print_disable(&result);

    if let Some(duration) = result.reenable_after() {
        println!(
            "Focus mode will be re-enabled in {} minutes (at {})",
            duration.minutes(),
            display::reenable_at(chrono::Local::now(), duration).bold()
        );
    }
    if let Some(report) = focus
        .reenable_after(&result, thread::sleep)
        .context("Failed to re-enable focus mode")?
    {
        println!("\nTime's up, focus mode is back on.");
        display::print_enable(&report);
    }
    Ok(())
}
