//! Stealth publisher
//!
//! Keeps a pool of persistent service replicas registered with the service
//! manager. Every replica runs an identical copy of the watch binary, so
//! there is no "real" one to single out. Names come from the committed
//! pool in config, never from fresh randomness, so republishing converges
//! on the same set.
//!
//! Publishing checks every candidate name before touching anything: a
//! registered service with a pool name that focusd did not write aborts
//! the whole operation.

use crate::config::ReplicaSettings;
use crate::error::{FocusError, Result};
use crate::store;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// The service manager operations publishing needs
pub trait ServiceManager {
    /// Registered definition for `name`, if the host has one
    fn definition(&self, name: &str) -> Result<Option<String>>;
    fn is_active(&self, name: &str) -> bool;
    fn stop(&self, name: &str) -> Result<()>;
    /// Re-read definitions from disk
    fn reload(&self) -> Result<()>;
    fn start(&self, name: &str) -> Result<()>;
    fn enable(&self, name: &str) -> Result<()>;
}

/// systemd via `systemctl`
#[derive(Debug, Clone)]
pub struct Systemd {
    unit_dir: PathBuf,
}

impl Systemd {
    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    fn systemctl(&self, args: &[&str]) -> Result<()> {
        let command = format!("systemctl {}", args.join(" "));
        debug!("Running {}", command);
        let output = Command::new("systemctl")
            .args(args)
            .output()
            .map_err(|e| FocusError::ServiceManager {
                command: command.clone(),
                message: e.to_string(),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(FocusError::ServiceManager {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl ServiceManager for Systemd {
    fn definition(&self, name: &str) -> Result<Option<String>> {
        let path = unit_path(&self.unit_dir, name);
        match fs::read_to_string(&path) {
            Ok(content) => return Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(FocusError::io("read", &path, e)),
        }

        // Units living in other search paths (/etc/systemd/system, ...)
        let output = Command::new("systemctl")
            .args(["cat", &unit_file_name(name)])
            .output();
        match output {
            Ok(out) if out.status.success() => {
                Ok(Some(String::from_utf8_lossy(&out.stdout).to_string()))
            }
            _ => Ok(None),
        }
    }

    fn is_active(&self, name: &str) -> bool {
        Command::new("systemctl")
            .args(["is-active", "--quiet", &unit_file_name(name)])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.systemctl(&["stop", &unit_file_name(name)])
    }

    fn reload(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"])
    }

    fn start(&self, name: &str) -> Result<()> {
        self.systemctl(&["start", &unit_file_name(name)])
    }

    fn enable(&self, name: &str) -> Result<()> {
        self.systemctl(&["enable", &unit_file_name(name)])
    }
}

fn unit_file_name(name: &str) -> String {
    format!("{}.service", name)
}

fn unit_path(unit_dir: &Path, name: &str) -> PathBuf {
    unit_dir.join(unit_file_name(name))
}

/// A persistent service entry backed by the watch binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReplica {
    pub name: String,
    /// Service definition file
    pub file_path: PathBuf,
    /// Where the binary copy lives
    pub exec_path: PathBuf,
    /// Always true: decoys run the same binary as everything else
    pub is_real_binary: bool,
}

/// What a publish run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Replicas that were already registered before this run
    pub existing: Vec<String>,
    /// Replicas chosen in this run
    pub added: Vec<String>,
    /// Final deployed set, sorted
    pub replicas: Vec<ServiceReplica>,
}

pub struct StealthPublisher<'a, M: ServiceManager + ?Sized> {
    settings: &'a ReplicaSettings,
    manager: &'a M,
}

impl<'a, M: ServiceManager + ?Sized> StealthPublisher<'a, M> {
    pub fn new(settings: &'a ReplicaSettings, manager: &'a M) -> Self {
        Self { settings, manager }
    }

    /// Pool names, deduplicated and sorted
    pub fn candidates(&self) -> Vec<String> {
        self.settings
            .names
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn exec_path(&self, name: &str) -> PathBuf {
        self.settings.bin_dir.join(name)
    }

    fn exec_line(&self, name: &str) -> String {
        format!("ExecStart={} --name {}", self.exec_path(name).display(), name)
    }

    /// Unit file for one replica
    pub fn render_unit(&self, name: &str) -> String {
        format!(
            "[Unit]\n\
             Description={name}\n\
             After=network.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             {exec}\n\
             Restart=always\n\
             RestartSec=3\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            name = name,
            exec = self.exec_line(name),
        )
    }

    /// A definition is ours when it runs our binary copy under this name
    pub fn is_managed(&self, name: &str, definition: &str) -> bool {
        let expected = self.exec_line(name);
        definition.lines().any(|line| line.trim() == expected)
    }

    fn replica(&self, name: &str) -> ServiceReplica {
        ServiceReplica {
            name: name.to_string(),
            file_path: unit_path(&self.settings.unit_dir, name),
            exec_path: self.exec_path(name),
            is_real_binary: true,
        }
    }

    /// Fail on the first pool name owned by a foreign service; otherwise return the managed ones
    fn check_candidates(&self) -> Result<Vec<String>> {
        let mut deployed = Vec::new();
        for name in self.candidates() {
            if let Some(definition) = self.manager.definition(&name)? {
                if !self.is_managed(&name, &definition) {
                    return Err(FocusError::ReplicaCollision { name });
                }
                deployed.push(name);
            }
        }
        Ok(deployed)
    }

    /// Managed replicas currently registered
    pub fn deployed(&self) -> Result<Vec<String>> {
        let mut deployed = Vec::new();
        for name in self.candidates() {
            if let Some(definition) = self.manager.definition(&name)? {
                if self.is_managed(&name, &definition) {
                    deployed.push(name);
                }
            }
        }
        Ok(deployed)
    }

    /// Existing replicas plus a random top-up to `count`, sorted
    fn target_set<R: Rng + ?Sized>(
        &self,
        existing: &[String],
        count: usize,
        rng: &mut R,
    ) -> (Vec<String>, Vec<String>) {
        let mut unused: Vec<String> = self
            .candidates()
            .into_iter()
            .filter(|n| !existing.contains(n))
            .collect();
        let shortfall = count.saturating_sub(existing.len());
        unused.shuffle(rng);
        let mut added: Vec<String> = unused.into_iter().take(shortfall).collect();
        added.sort();

        let target: BTreeSet<String> = existing.iter().chain(added.iter()).cloned().collect();
        (target.into_iter().collect(), added)
    }

    pub fn publish(&self, real_binary: &Path, count: usize) -> Result<PublishReport> {
        self.publish_with_rng(real_binary, count, &mut rand::thread_rng())
    }

    pub fn publish_with_rng<R: Rng + ?Sized>(
        &self,
        real_binary: &Path,
        count: usize,
        rng: &mut R,
    ) -> Result<PublishReport> {
        let existing = self.check_candidates()?;
        if count == 0 {
            debug!("Replica count is 0, nothing to publish");
            return Ok(PublishReport {
                existing,
                ..Default::default()
            });
        }
        if !real_binary.is_file() {
            return Err(FocusError::io(
                "read",
                real_binary,
                std::io::Error::new(std::io::ErrorKind::NotFound, "binary not found"),
            ));
        }

        let (target, added) = self.target_set(&existing, count, rng);
        if target.len() < count {
            warn!(
                "Only {} replica names available, wanted {}",
                target.len(),
                count
            );
        }

        let replicas: Vec<ServiceReplica> = target.iter().map(|n| self.replica(n)).collect();
        for replica in &replicas {
            store::sync(&self.render_unit(&replica.name), &replica.file_path)?;
            if self.manager.is_active(&replica.name) {
                self.manager.stop(&replica.name)?;
            }
            install_binary(real_binary, &replica.exec_path)?;
        }

        self.manager.reload()?;
        for replica in &replicas {
            self.manager.start(&replica.name)?;
            self.manager.enable(&replica.name)?;
        }

        info!(
            "Published {} replicas ({} new)",
            replicas.len(),
            added.len()
        );
        Ok(PublishReport {
            existing,
            added,
            replicas,
        })
    }

    /// Stop every deployed replica without disabling it
    ///
    /// They come back on the next publish or reboot.
    pub fn suspend(&self) -> Result<Vec<String>> {
        let deployed = self.deployed()?;
        for name in &deployed {
            if self.manager.is_active(name) {
                self.manager.stop(name)?;
            }
        }
        Ok(deployed)
    }
}

fn install_binary(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| FocusError::io("create directory", parent, e))?;
    }
    fs::copy(src, dst).map_err(|e| FocusError::io("copy binary to", dst, e))?;
    fs::set_permissions(dst, fs::Permissions::from_mode(0o755))
        .map_err(|e| FocusError::io("chmod", dst, e))
}
