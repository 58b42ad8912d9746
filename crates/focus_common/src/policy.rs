//! Policy document
//!
//! The enforcement rules derived from config, and the files they render to.
//! Rendering is plain string building; all writes go through `store`.

use crate::config::FocusConfig;
use crate::error::{FocusError, Result};
use crate::store::{self, SyncOutcome};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// One enforcement rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Browser extension that must be force-installed
    ForceExtension(String),
    /// Domain resolved to `target` through the hosts file
    Redirect { domain: String, target: String },
    /// Resolver the system must use
    DnsServer(String),
}

/// Which system consumer a managed file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedKind {
    BrowserPolicy,
    Hosts,
    Resolver,
}

impl ManagedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagedKind::BrowserPolicy => "browser policy",
            ManagedKind::Hosts => "hosts",
            ManagedKind::Resolver => "resolver",
        }
    }
}

/// A rendered file and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFile {
    pub kind: ManagedKind,
    pub path: PathBuf,
    pub content: String,
}

impl ManagedFile {
    pub fn sync(&self) -> Result<SyncOutcome> {
        store::sync(&self.content, &self.path)
    }
}

#[derive(Serialize)]
struct BrowserPolicyBody<'a> {
    #[serde(rename = "ExtensionInstallForcelist")]
    extension_install_forcelist: &'a [String],
}

/// Ordered enforcement rules plus where each kind is written
#[derive(Debug, Clone)]
pub struct PolicyDocument {
    rules: Vec<Rule>,
    policy_path: PathBuf,
    hosts_path: Option<PathBuf>,
    resolver_path: Option<PathBuf>,
}

impl PolicyDocument {
    pub fn from_config(config: &FocusConfig) -> Result<Self> {
        let mut rules: Vec<Rule> = config
            .policy
            .extension_ids
            .iter()
            .map(|id| Rule::ForceExtension(id.clone()))
            .collect();

        if config.hosts.enabled {
            let mut domains = config.hosts.blocked_domains.clone();
            if let Some(file) = &config.hosts.blocklist_file {
                domains.extend(read_blocklist(file)?);
            }
            rules.extend(domains.into_iter().map(|domain| Rule::Redirect {
                domain,
                target: config.hosts.block_ip.clone(),
            }));
            for (ip, names) in &config.hosts.overrides {
                rules.extend(names.iter().map(|domain| Rule::Redirect {
                    domain: domain.clone(),
                    target: ip.clone(),
                }));
            }
        }

        if config.dns.enabled {
            rules.extend(config.dns.servers.iter().cloned().map(Rule::DnsServer));
        }

        Ok(Self {
            rules,
            policy_path: config.policy.path.clone(),
            hosts_path: config.hosts.enabled.then(|| config.hosts.path.clone()),
            resolver_path: config.dns.enabled.then(|| config.dns.path.clone()),
        })
    }

    /// Render every file this document enforces, browser policy first
    pub fn render(&self) -> Result<Vec<ManagedFile>> {
        let mut files = vec![ManagedFile {
            kind: ManagedKind::BrowserPolicy,
            path: self.policy_path.clone(),
            content: self.render_browser_policy()?,
        }];
        if let Some(path) = &self.hosts_path {
            files.push(ManagedFile {
                kind: ManagedKind::Hosts,
                path: path.clone(),
                content: self.render_hosts(),
            });
        }
        if let Some(path) = &self.resolver_path {
            files.push(ManagedFile {
                kind: ManagedKind::Resolver,
                path: path.clone(),
                content: self.render_resolver(),
            });
        }
        Ok(files)
    }

    /// Hash over all rendered content; changes whenever any rule changes
    pub fn content_hash(&self) -> Result<String> {
        let joined: String = self
            .render()?
            .into_iter()
            .map(|f| f.content)
            .collect::<Vec<_>>()
            .join("\0");
        Ok(store::content_hash(joined.as_bytes()))
    }

    fn render_browser_policy(&self) -> Result<String> {
        let ids: Vec<String> = self
            .rules
            .iter()
            .filter_map(|r| match r {
                Rule::ForceExtension(id) => Some(id.clone()),
                _ => None,
            })
            .collect();
        let body = BrowserPolicyBody {
            extension_install_forcelist: &ids,
        };
        Ok(serde_json::to_string_pretty(&body)?)
    }

    fn render_hosts(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            if let Rule::Redirect { domain, target } = rule {
                out.push_str(&format!("{}  {}\n", target, domain));
            }
        }
        out
    }

    fn render_resolver(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            if let Rule::DnsServer(ip) = rule {
                out.push_str(&format!("nameserver {}\n", ip));
            }
        }
        out
    }

    /// Write every managed file, backing up system files the first time we replace them
    pub fn apply(&self, backup_dir: &Path) -> Result<Vec<(ManagedFile, SyncOutcome)>> {
        let mut results = Vec::new();
        for file in self.render()? {
            if file.kind != ManagedKind::BrowserPolicy {
                store::backup_once(&file.path, backup_dir)?;
            }
            let outcome = file.sync()?;
            results.push((file, outcome));
        }
        Ok(results)
    }

    /// Undo enforcement: drop the browser policy, put system files back
    pub fn release(&self, backup_dir: &Path) -> Result<()> {
        for file in self.render()? {
            match file.kind {
                ManagedKind::BrowserPolicy => {
                    store::remove(&file.path)?;
                }
                ManagedKind::Hosts | ManagedKind::Resolver => {
                    if store::restore_backup(&file.path, backup_dir)? {
                        info!("Restored original {} at {}", file.kind.as_str(), file.path.display());
                    }
                }
            }
        }
        Ok(())
    }
}

fn read_blocklist(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| FocusError::io("read", path, e))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// True when a managed file was emptied rather than deleted
///
/// Covers blank files and JSON that parses to an empty object.
pub fn is_cleared(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return true;
    }
    matches!(
        serde_json::from_str::<serde_json::Value>(trimmed),
        Ok(serde_json::Value::Object(map)) if map.is_empty()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> FocusConfig {
        let mut config = FocusConfig::default();
        config.policy.path = dir.join("managed/managed_policies.json");
        config.policy.extension_ids = vec!["aaa".to_string(), "bbb".to_string()];
        config.hosts.path = dir.join("hosts");
        config.dns.path = dir.join("resolv.conf");
        config
    }

    #[test]
    fn test_browser_policy_only_by_default() {
        let temp = TempDir::new().unwrap();
        let doc = PolicyDocument::from_config(&config_in(temp.path())).unwrap();
        let files = doc.render().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].kind, ManagedKind::BrowserPolicy);

        let json: serde_json::Value = serde_json::from_str(&files[0].content).unwrap();
        assert_eq!(json["ExtensionInstallForcelist"], serde_json::json!(["aaa", "bbb"]));
    }

    #[test]
    fn test_hosts_and_resolver_rendering() {
        let temp = TempDir::new().unwrap();
        let blocklist = temp.path().join("black.csv");
        fs::write(&blocklist, "# social\nreddit.com\n\nnews.ycombinator.com\n").unwrap();

        let mut config = config_in(temp.path());
        config.hosts.enabled = true;
        config.hosts.blocked_domains = vec!["youtube.com".to_string()];
        config.hosts.blocklist_file = Some(blocklist);
        config.dns.enabled = true;

        let files = PolicyDocument::from_config(&config).unwrap().render().unwrap();
        assert_eq!(files.len(), 3);

        let hosts = &files[1].content;
        assert!(hosts.starts_with("192.168.0.99  youtube.com\n"));
        assert!(hosts.contains("192.168.0.99  reddit.com\n"));
        assert!(hosts.contains("192.168.0.99  news.ycombinator.com\n"));
        assert!(hosts.contains("216.239.38.120  www.google.com\n"));
        assert!(!hosts.contains("social"));

        assert_eq!(
            files[2].content,
            "nameserver 208.67.220.222\nnameserver 208.67.220.220\n"
        );
    }

    #[test]
    fn test_content_hash_tracks_rules() {
        let temp = TempDir::new().unwrap();
        let mut config = config_in(temp.path());
        let first = PolicyDocument::from_config(&config).unwrap().content_hash().unwrap();
        config.policy.extension_ids.push("ccc".to_string());
        let second = PolicyDocument::from_config(&config).unwrap().content_hash().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_apply_and_release() {
        let temp = TempDir::new().unwrap();
        let backups = temp.path().join("backup");
        let mut config = config_in(temp.path());
        config.hosts.enabled = true;
        fs::write(&config.hosts.path, "127.0.0.1 localhost\n").unwrap();

        let doc = PolicyDocument::from_config(&config).unwrap();
        let results = doc.apply(&backups).unwrap();
        assert!(results.iter().all(|(_, o)| *o == SyncOutcome::Written));
        assert!(doc.apply(&backups).unwrap().iter().all(|(_, o)| *o == SyncOutcome::Skipped));

        doc.release(&backups).unwrap();
        assert!(!config.policy.path.exists());
        assert_eq!(fs::read_to_string(&config.hosts.path).unwrap(), "127.0.0.1 localhost\n");
    }

    #[test]
    fn test_is_cleared() {
        assert!(is_cleared(""));
        assert!(is_cleared("  \n"));
        assert!(is_cleared("{}"));
        assert!(is_cleared("{ }\n"));
        assert!(!is_cleared("{\"ExtensionInstallForcelist\": []}"));
        assert!(!is_cleared("127.0.0.1 localhost"));
    }
}
