//! Error types for focusd.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FocusError {
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("Duration must be between 1 and 60 minutes (got {0})")]
    InvalidDuration(i64),

    #[error("Service {name} already exists on this host and is not managed by focusd, choose another replica name")]
    ReplicaCollision { name: String },

    #[error("Service manager error ({command}): {message}")]
    ServiceManager { command: String, message: String },

    #[error("Daemon (pid {pid}) did not exit after SIGTERM")]
    StopTimeout { pid: i32 },

    #[error("Lock file {} is corrupted: {content:?}", .path.display())]
    CorruptLock { path: PathBuf, content: String },

    #[error("Quote provider error: {0}")]
    Quote(String),

    #[error("Terminal error: {0}")]
    Terminal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FocusError {
    /// Wrap an io error with the path it happened on
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FocusError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FocusError>;
