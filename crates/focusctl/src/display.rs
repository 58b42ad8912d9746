//! Terminal output for focusctl commands

use crate::commands::{DisableResult, EnableReport, StatusReport};
use crate::gate::{DisableDuration, GateOutcome};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
use focus_common::{PublishReport, StartOutcome, StopOutcome, SyncOutcome};
use owo_colors::OwoColorize;
use std::fmt::Display;

const KEY_WIDTH: usize = 12;

fn print_kv(key: &str, value: impl Display) {
    println!("{:width$} {}", key.dimmed(), value, width = KEY_WIDTH);
}

pub fn print_enable(report: &EnableReport) {
    for (kind, path, outcome) in &report.policy {
        let state = match outcome {
            SyncOutcome::Written => "written".green().to_string(),
            SyncOutcome::Skipped => "unchanged".dimmed().to_string(),
        };
        print_kv(kind.as_str(), format!("{}  {}", path.display(), state));
    }
    if report.browsers_killed > 0 {
        print_kv("browsers", format!("closed {} processes", report.browsers_killed));
    }
    match &report.daemon {
        StartOutcome::AlreadyRunning { pid } => {
            print_kv("daemon", format!("already running (pid {})", pid))
        }
        StartOutcome::Started(identity) => print_kv(
            "daemon",
            format!("started as {} (pid {})", identity.process_name, identity.pid),
        ),
    }
    if let Some(replicas) = &report.replicas {
        print_publish(replicas);
    }
    println!("{} Focus mode enabled", "✓".green().bold());
}

pub fn print_publish(report: &PublishReport) {
    print_kv(
        "replicas",
        format!("{} deployed, {} new", report.replicas.len(), report.added.len()),
    );
    for name in &report.added {
        println!("{:width$}   + {}", "", name.cyan(), width = KEY_WIDTH);
    }
}

pub fn print_disable(result: &DisableResult) {
    match result {
        DisableResult::InvalidDuration(minutes) => {
            println!(
                "{} Duration must be between {} and {} minutes (got {})",
                "✗".red().bold(),
                DisableDuration::MIN_MINUTES,
                DisableDuration::MAX_MINUTES,
                minutes
            );
        }
        DisableResult::Declined(outcome) => {
            let message = match outcome {
                GateOutcome::PasteDetected => "Copy/paste detected. Please type the quote manually.",
                GateOutcome::Mismatched => "Quote does not match. Focus mode stays enabled.",
                GateOutcome::Cancelled => "Cancelled. Focus mode stays enabled.",
                GateOutcome::Unavailable => "No interactive terminal. Focus mode stays enabled.",
                GateOutcome::Matched => return,
            };
            println!("\n{} {}", "✗".red().bold(), message);
        }
        DisableResult::Disabled {
            daemon, suspended, ..
        } => {
            let daemon = match daemon {
                StopOutcome::NotRunning => "was not running".to_string(),
                StopOutcome::Stopped { pid } => format!("stopped (pid {})", pid),
                StopOutcome::StaleLockRemoved => "stale lock removed".to_string(),
            };
            print_kv("daemon", daemon);
            if !suspended.is_empty() {
                print_kv("replicas", format!("{} suspended", suspended.len()));
            }
            println!("{} Focus mode disabled", "✓".green().bold());
        }
    }
}

/// Wall-clock time enforcement comes back, as `HH:MM:SS`
pub fn reenable_at<Tz: TimeZone>(now: DateTime<Tz>, duration: DisableDuration) -> String
where
    Tz::Offset: Display,
{
    let at = now + ChronoDuration::minutes(i64::from(duration.minutes()));
    at.format("%H:%M:%S").to_string()
}

pub fn print_status(status: &StatusReport) {
    println!();
    let headline = if status.is_active() {
        "ACTIVE".green().bold().to_string()
    } else {
        "INACTIVE".red().bold().to_string()
    };
    println!("focusctl v{}  {}", env!("CARGO_PKG_VERSION"), headline);
    println!("{}", "─".repeat(48).dimmed());

    match status.daemon_pid {
        Some(pid) => print_kv("daemon", format!("{} (pid {})", "running".green(), pid)),
        None => print_kv("daemon", "stopped".red()),
    }
    if let Some(name) = &status.disguise {
        print_kv("disguise", name);
    }
    let policy = if status.policy_present {
        "present".green().to_string()
    } else {
        "missing".red().to_string()
    };
    print_kv("policy", format!("{}  {}", policy, status.policy_path.display()));
    match status.replicas {
        Some(count) => print_kv("replicas", count),
        None => print_kv("replicas", "unknown".yellow()),
    }
    println!();
}

/// Status when the config itself cannot be read
pub fn print_status_unknown(reason: &str) {
    println!();
    println!("focusctl v{}  {}", env!("CARGO_PKG_VERSION"), "UNKNOWN".yellow().bold());
    println!("{}", "─".repeat(48).dimmed());
    print_kv("config", format!("{}  {}", "config error".red(), reason));
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_reenable_at() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 23, 50, 0).unwrap();
        assert_eq!(reenable_at(now, DisableDuration::new(15).unwrap()), "00:05:00");
        assert_eq!(reenable_at(now, DisableDuration::new(1).unwrap()), "23:51:00");
    }
}
