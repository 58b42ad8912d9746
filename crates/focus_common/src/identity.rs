//! Obfuscated identity
//!
//! Names that blend in with ordinary desktop/system processes, and the
//! record of which one the running daemon is currently wearing.

use crate::error::{FocusError, Result};
use crate::store;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Common system process prefixes
const PREFIXES: &[&str] = &[
    "systemd",
    "gvfs",
    "dbus",
    "update-notifier",
    "evolution",
    "tracker",
    "gnome",
    "gio",
];

/// Common system process suffixes
const SUFFIXES: &[&str] = &[
    "monitor", "helper", "daemon", "service", "worker", "store", "miner", "agent",
];

const RANDOM_SEGMENT_LEN: usize = 6;

/// Generates `{prefix}-{6 lowercase letters}-{suffix}` names
///
/// Camouflage only: nothing prevents two calls from producing the same name.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityObfuscator;

impl IdentityObfuscator {
    pub fn generate_name(&self) -> String {
        self.generate_name_with(&mut rand::thread_rng())
    }

    pub fn generate_name_with<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let prefix = PREFIXES.choose(rng).copied().unwrap_or("systemd");
        let suffix = SUFFIXES.choose(rng).copied().unwrap_or("helper");
        let random_id: String = (0..RANDOM_SEGMENT_LEN)
            .map(|_| rng.gen_range(b'a'..=b'z') as char)
            .collect();
        format!("{}-{}-{}", prefix, random_id, suffix)
    }
}

/// The live daemon's disguise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonIdentity {
    pub process_name: String,
    pub lock_path: PathBuf,
    pub pid: i32,
    pub started_at: DateTime<Utc>,
}

impl DaemonIdentity {
    pub fn new(process_name: String, lock_path: PathBuf, pid: i32) -> Self {
        Self {
            process_name,
            lock_path,
            pid,
            started_at: Utc::now(),
        }
    }

    /// Persist next to the lock so the name survives CLI restarts
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        store::atomic_write(path, content.as_bytes())
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content).ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FocusError::io("read", path, e)),
        }
    }

    pub fn clear(path: &Path) -> Result<()> {
        store::remove(path).map(|_| ())
    }
}
