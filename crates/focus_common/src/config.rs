//! focusd Configuration
//!
//! Configuration lives in /etc/focusd/config.toml. It is loaded once per
//! invocation and handed to every component as an immutable value.
//! Every section falls back to built-in defaults, so an absent file means
//! "enforce the defaults".

use crate::error::{FocusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/focusd";
const CONFIG_FILE: &str = "config.toml";

/// Default configuration file path
pub fn config_path() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE)
}

// ============================================================================
// Sections
// ============================================================================

/// Managed browser policy (Chrome managed_policies.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub path: PathBuf,
    /// Extensions force-installed through ExtensionInstallForcelist
    pub extension_ids: Vec<String>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/opt/chrome/policies/managed/managed_policies.json"),
            extension_ids: vec![
                "eiimnmioipafcokbfikbljfdeojpcgbh".to_string(), // BlockSite
                "langadckdfefkcnjfmfnfeckafibfkji".to_string(), // Force Safe Search
                "laankejkbhbdhmipfmgcngdelahlfoji".to_string(), // StayFocusd
                "blaaajhemilngeeffpbfkdjjoefldkok".to_string(), // LeechBlock NG
            ],
        }
    }
}

/// Hosts file overwrite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsSettings {
    pub enabled: bool,
    pub path: PathBuf,
    /// Address every blocked domain resolves to
    pub block_ip: String,
    pub blocked_domains: Vec<String>,
    /// One domain per line, `#` starts a comment
    pub blocklist_file: Option<PathBuf>,
    /// Fixed routes, ip -> domains
    pub overrides: BTreeMap<String, Vec<String>>,
}

impl Default for HostsSettings {
    fn default() -> Self {
        let mut overrides = BTreeMap::new();
        // forcesafesearch.google.com
        overrides.insert(
            "216.239.38.120".to_string(),
            vec![
                "www.google.com".to_string(),
                "youtubei.googleapis.com".to_string(),
                "youtube.googleapis.com".to_string(),
            ],
        );

        Self {
            enabled: false,
            path: PathBuf::from("/etc/hosts"),
            block_ip: "192.168.0.99".to_string(),
            blocked_domains: Vec::new(),
            blocklist_file: None,
            overrides,
        }
    }
}

/// Resolver overwrite
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSettings {
    pub enabled: bool,
    pub path: PathBuf,
    pub servers: Vec<String>,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("/etc/resolv.conf"),
            servers: vec!["208.67.220.222".to_string(), "208.67.220.220".to_string()],
        }
    }
}

/// Compliance daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub lock_path: PathBuf,
    /// Identity record and backups of overwritten system files
    pub state_dir: PathBuf,
    /// Delay before restoring a deleted file
    pub grace_period_ms: u64,
    /// Watch binary, defaults to `focusd` next to the running executable
    pub binary: Option<PathBuf>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            lock_path: PathBuf::from("/tmp/.focusd_daemon.lock"),
            state_dir: PathBuf::from("/var/lib/focusd"),
            grace_period_ms: 500,
            binary: None,
        }
    }
}

impl DaemonSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn identity_path(&self) -> PathBuf {
        self.state_dir.join("identity.json")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.state_dir.join("backup")
    }

    /// Resolve the watch binary
    pub fn binary_path(&self) -> PathBuf {
        if let Some(binary) = &self.binary {
            return binary.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("focusd")))
            .unwrap_or_else(|| PathBuf::from("/usr/local/bin/focusd"))
    }
}

/// Service replicas
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaSettings {
    pub count: usize,
    /// Committed pool replica names are drawn from
    pub names: Vec<String>,
    pub unit_dir: PathBuf,
    pub bin_dir: PathBuf,
}

impl Default for ReplicaSettings {
    fn default() -> Self {
        Self {
            count: 5,
            names: DEFAULT_REPLICA_NAMES.iter().map(|s| s.to_string()).collect(),
            unit_dir: PathBuf::from("/lib/systemd/system"),
            bin_dir: PathBuf::from("/usr/bin"),
        }
    }
}

const DEFAULT_REPLICA_NAMES: &[&str] = &[
    "dbus-broker-helper",
    "gvfs-metadata-agent",
    "gnome-settings-monitor",
    "tracker-extract-worker",
    "evolution-source-store",
    "systemd-coredump-helper",
    "update-notifier-agent",
    "gio-launch-monitor",
    "colord-session-helper",
    "udisks-automount-agent",
];

/// Motivational quote source for the disable gate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteSettings {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub fallbacks: Vec<String>,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.quotable.io/random?tags=inspirational".to_string(),
            timeout_secs: 5,
            fallbacks: vec![
                "The only way to do great work is to love what you do. - Steve Jobs".to_string(),
                "Success is not final, failure is not fatal: it is the courage to continue that counts. - Winston Churchill".to_string(),
                "Believe you can and you're halfway there. - Theodore Roosevelt".to_string(),
                "Your limitation is only your imagination. - Unknown".to_string(),
            ],
        }
    }
}

impl QuoteSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Browsers killed on enable so the new policy is picked up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub kill_list: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            kill_list: vec!["brave".to_string(), "firefox".to_string()],
        }
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    pub policy: PolicySettings,
    pub hosts: HostsSettings,
    pub dns: DnsSettings,
    pub daemon: DaemonSettings,
    pub replicas: ReplicaSettings,
    pub quote: QuoteSettings,
    pub browsers: BrowserSettings,
}

impl FocusConfig {
    /// Load from the system config file
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load from an explicit path. A missing file gives defaults, a broken one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| FocusError::io("read", path, e))?;
        Self::parse(&content).map_err(|message| FocusError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }
}
