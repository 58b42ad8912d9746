//! Policy state store
//!
//! Hash-compared, atomic file sync for every file focusd enforces.
//! A reader never sees a half-written target: content goes to a temp file
//! in the same directory and is renamed over the target.

use crate::error::{FocusError, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// World-readable, owner-writable
const POLICY_MODE: u32 = 0o644;

/// What `sync` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Existing content already matched
    Skipped,
    Written,
}

/// SHA-256 of the given bytes, hex encoded
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write `content` to `path` unless the file already holds exactly that content
pub fn sync(content: &str, path: &Path) -> Result<SyncOutcome> {
    match fs::read(path) {
        Ok(existing) => {
            if content_hash(&existing) == content_hash(content.as_bytes()) {
                debug!("{} same hash, skip", path.display());
                return Ok(SyncOutcome::Skipped);
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(FocusError::io("read", path, e)),
    }

    atomic_write(path, content.as_bytes())?;
    info!("Wrote {} ({} bytes)", path.display(), content.len());
    Ok(SyncOutcome::Written)
}

/// Write data through a sibling temp file and rename it over the target
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| FocusError::io("create directory", parent, e))?;

    let temp_path = temp_path_for(path);
    let written = write_temp(&temp_path, data).and_then(|_| {
        fs::rename(&temp_path, path).map_err(|e| FocusError::io("rename into", path, e))
    });
    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written
}

fn write_temp(temp_path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(temp_path).map_err(|e| FocusError::io("create", temp_path, e))?;
    file.write_all(data)
        .and_then(|_| file.sync_all())
        .map_err(|e| FocusError::io("write", temp_path, e))?;
    fs::set_permissions(temp_path, fs::Permissions::from_mode(POLICY_MODE))
        .map_err(|e| FocusError::io("chmod", temp_path, e))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "policy".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

pub fn exists(path: &Path) -> bool {
    path.is_file()
}

/// Delete the file if present. Returns whether anything was removed.
pub fn remove(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(FocusError::io("remove", path, e)),
    }
}

// ============================================================================
// Backups of system files we overwrite
// ============================================================================

fn backup_path(path: &Path, backup_dir: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    backup_dir.join(name)
}

/// Copy the current file aside, but only the first time
///
/// Returns true when a new backup was taken.
pub fn backup_once(path: &Path, backup_dir: &Path) -> Result<bool> {
    let backup = backup_path(path, backup_dir);
    if backup.exists() || !path.exists() {
        return Ok(false);
    }
    let data = fs::read(path).map_err(|e| FocusError::io("read", path, e))?;
    atomic_write(&backup, &data)?;
    info!("Backed up {} to {}", path.display(), backup.display());
    Ok(true)
}

/// Put a backed-up file back and drop the backup
///
/// Returns false when there was no backup to restore.
pub fn restore_backup(path: &Path, backup_dir: &Path) -> Result<bool> {
    let backup = backup_path(path, backup_dir);
    let data = match fs::read(&backup) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(FocusError::io("read", &backup, e)),
    };
    atomic_write(path, &data)?;
    remove(&backup)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sync_writes_then_skips() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("managed/policy.json");

        assert_eq!(sync("{\"a\": 1}", &path).unwrap(), SyncOutcome::Written);
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        assert_eq!(sync("{\"a\": 1}", &path).unwrap(), SyncOutcome::Skipped);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_sync_overwrites_changed_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("policy.json");
        fs::write(&path, "{}").unwrap();

        assert_eq!(sync("{\"b\": 2}", &path).unwrap(), SyncOutcome::Written);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"b\": 2}");
    }

    #[test]
    fn test_sync_sets_world_readable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("policy.json");
        sync("x", &path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_sync_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("policy.json");
        sync("one", &path).unwrap();
        sync("two", &path).unwrap();
        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_remove_is_noop_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("policy.json");
        assert!(!remove(&path).unwrap());
        fs::write(&path, "x").unwrap();
        assert!(exists(&path));
        assert!(remove(&path).unwrap());
        assert!(!exists(&path));
    }

    #[test]
    fn test_backup_taken_once_and_restored() {
        let temp = TempDir::new().unwrap();
        let hosts = temp.path().join("hosts");
        let backups = temp.path().join("backup");
        fs::write(&hosts, "127.0.0.1 localhost\n").unwrap();

        assert!(backup_once(&hosts, &backups).unwrap());
        sync("192.168.0.99  example.com\n", &hosts).unwrap();
        // Second enable must not back up our own content
        assert!(!backup_once(&hosts, &backups).unwrap());

        assert!(restore_backup(&hosts, &backups).unwrap());
        assert_eq!(fs::read_to_string(&hosts).unwrap(), "127.0.0.1 localhost\n");
        assert!(!restore_backup(&hosts, &backups).unwrap());
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
        assert_eq!(content_hash(b"").len(), 64);
    }
}
