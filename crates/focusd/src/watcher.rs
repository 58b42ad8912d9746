//! Compliance watcher - restores managed files when they are tampered with
//!
//! Watches the parent directory of every managed file. Two things count as
//! tampering:
//! - the file is deleted (or renamed away)
//! - the file is emptied, or reduced to `{}`
//!
//! Everything else is ignored. Restores run one at a time on this thread;
//! an event queued during a restore is handled only after it finishes.
//! A failed restore is logged and the loop keeps going, the next event on
//! the same file retries it.

use anyhow::{Context, Result};
use focus_common::policy::{self, ManagedFile, PolicyDocument};
use focus_common::SyncOutcome;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often the loop checks its shutdown flag while idle
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Stopped,
    Starting,
    Watching,
    Restoring,
    Stopping,
}

/// Kind of tampering detected on a managed file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tamper {
    Deleted,
    Cleared,
}

pub struct ComplianceDaemon {
    files: Vec<ManagedFile>,
    grace_period: Duration,
    state: WatchState,
}

impl ComplianceDaemon {
    pub fn new(document: &PolicyDocument, grace_period: Duration) -> Result<Self> {
        Ok(Self {
            files: document.render().context("Failed to render policy")?,
            grace_period,
            state: WatchState::Stopped,
        })
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn files(&self) -> &[ManagedFile] {
        &self.files
    }

    fn watch_dirs(&self) -> BTreeSet<PathBuf> {
        self.files
            .iter()
            .filter_map(|f| f.path.parent().map(Path::to_path_buf))
            .collect()
    }

    /// Which managed file an event is about, and whether it is tampering
    pub fn classify(&self, event: &Event) -> Option<(usize, Tamper)> {
        let index = self
            .files
            .iter()
            .position(|f| event.paths.iter().any(|p| p == &f.path))?;
        let path = &self.files[index].path;

        match event.kind {
            EventKind::Remove(_) => Some((index, Tamper::Deleted)),
            // The tracked path was the source of a rename
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                Some((index, Tamper::Deleted))
            }
            EventKind::Modify(_) => match fs::read_to_string(path) {
                Ok(content) if policy::is_cleared(&content) => Some((index, Tamper::Cleared)),
                Ok(_) => None,
                Err(e) if e.kind() == ErrorKind::NotFound => Some((index, Tamper::Deleted)),
                Err(e) => {
                    debug!("Could not read {} after modify: {}", path.display(), e);
                    None
                }
            },
            _ => None,
        }
    }

    /// Rewrite one managed file. Transient failures are returned, not fatal.
    pub fn restore(&mut self, index: usize) -> focus_common::Result<SyncOutcome> {
        self.state = WatchState::Restoring;
        let result = self.files[index].sync();
        self.state = WatchState::Watching;
        result
    }

    /// Watched directories this event says are gone (deleted or moved away)
    pub fn lost_dirs(&self, event: &Event) -> Vec<PathBuf> {
        match event.kind {
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => self
                .watch_dirs()
                .into_iter()
                .filter(|dir| event.paths.iter().any(|p| p == dir))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn handle(&mut self, event: &Event, watcher: &mut RecommendedWatcher) {
        let lost = self.lost_dirs(event);
        if !lost.is_empty() {
            self.rewatch_lost_dirs(lost, watcher);
            return;
        }

        let Some((index, tamper)) = self.classify(event) else {
            return;
        };
        let path = self.files[index].path.clone();
        match tamper {
            Tamper::Deleted => info!("{} deleted, restoring...", path.display()),
            Tamper::Cleared => info!("{} cleared, restoring...", path.display()),
        }

        // Let a concurrent legitimate writer finish first
        thread::sleep(self.grace_period);

        match self.restore(index) {
            Ok(SyncOutcome::Written) => info!("{} restored", path.display()),
            Ok(SyncOutcome::Skipped) => debug!("{} already intact", path.display()),
            Err(e) => error!("Failed to restore {}: {}", path.display(), e),
        }
    }

    /// A watched directory that disappears takes its inotify watch with it.
    /// One that is moved keeps the watch, now following the wrong inode.
    fn rewatch_lost_dirs(&mut self, lost: Vec<PathBuf>, watcher: &mut RecommendedWatcher) {
        for dir in lost {
            warn!("Watched directory {} removed, recreating", dir.display());
            // Already gone after a delete; only a move leaves one behind
            if let Err(e) = watcher.unwatch(&dir) {
                debug!("No watch left on {}: {}", dir.display(), e);
            }
            if let Err(e) = watch_dir(watcher, &dir) {
                error!("Failed to re-watch {}: {}", dir.display(), e);
                continue;
            }
            for index in 0..self.files.len() {
                if self.files[index].path.parent() == Some(dir.as_path()) {
                    if let Err(e) = self.restore(index) {
                        error!("Failed to restore {}: {}", self.files[index].path.display(), e);
                    }
                }
            }
        }
    }

    /// Write every managed file once
    pub fn sync_all(&mut self) {
        for index in 0..self.files.len() {
            match self.files[index].sync() {
                Ok(SyncOutcome::Written) => {
                    info!("{} was missing or stale, written", self.files[index].path.display())
                }
                Ok(SyncOutcome::Skipped) => {}
                Err(e) => error!("Failed to sync {}: {}", self.files[index].path.display(), e),
            }
        }
    }

    /// Watch until `shutdown` is set
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.state = WatchState::Starting;

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
        for dir in self.watch_dirs() {
            watch_dir(&mut watcher, &dir)?;
        }

        // Watches are live before the first write, so nothing slips between
        self.sync_all();
        self.state = WatchState::Watching;
        info!("Watching {} managed files", self.files.len());

        while !shutdown.load(Ordering::Relaxed) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => self.handle(&event, &mut watcher),
                Ok(Err(e)) => warn!("Watch error: {:?}", e),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("File watcher channel closed");
                    break;
                }
            }
        }

        self.state = WatchState::Stopping;
        drop(watcher);
        self.state = WatchState::Stopped;
        info!("Watcher stopped");
        Ok(())
    }
}

fn watch_dir(watcher: &mut RecommendedWatcher, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use focus_common::FocusConfig;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use tempfile::TempDir;

    fn daemon_in(temp: &TempDir) -> ComplianceDaemon {
        let mut config = FocusConfig::default();
        config.policy.path = temp.path().join("managed/managed_policies.json");
        let document = PolicyDocument::from_config(&config).unwrap();
        ComplianceDaemon::new(&document, Duration::from_millis(10)).unwrap()
    }

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    #[test]
    fn test_remove_is_tampering() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon_in(&temp);
        let path = daemon.files()[0].path.clone();
        assert_eq!(
            daemon.classify(&event(EventKind::Remove(RemoveKind::File), &path)),
            Some((0, Tamper::Deleted))
        );
    }

    #[test]
    fn test_cleared_content_is_tampering() {
        let temp = TempDir::new().unwrap();
        let mut daemon = daemon_in(&temp);
        daemon.sync_all();
        let path = daemon.files()[0].path.clone();
        let modify = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &path);

        assert_eq!(daemon.classify(&modify), None);

        fs::write(&path, "{}").unwrap();
        assert_eq!(daemon.classify(&modify), Some((0, Tamper::Cleared)));

        fs::write(&path, "").unwrap();
        assert_eq!(daemon.classify(&modify), Some((0, Tamper::Cleared)));

        fs::remove_file(&path).unwrap();
        assert_eq!(daemon.classify(&modify), Some((0, Tamper::Deleted)));
    }

    #[test]
    fn test_other_events_ignored() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon_in(&temp);
        let path = daemon.files()[0].path.clone();
        assert_eq!(daemon.classify(&event(EventKind::Create(CreateKind::File), &path)), None);
        assert_eq!(
            daemon.classify(&event(
                EventKind::Remove(RemoveKind::File),
                &temp.path().join("managed/other.json")
            )),
            None
        );
    }

    #[test]
    fn test_moved_or_removed_dir_is_lost() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon_in(&temp);
        let dir = temp.path().join("managed");

        let moved = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &dir);
        assert_eq!(daemon.lost_dirs(&moved), vec![dir.clone()]);
        let removed = event(EventKind::Remove(RemoveKind::Folder), &dir);
        assert_eq!(daemon.lost_dirs(&removed), vec![dir.clone()]);

        let written = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &dir);
        assert!(daemon.lost_dirs(&written).is_empty());
        let sibling = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &temp.path().join("other"),
        );
        assert!(daemon.lost_dirs(&sibling).is_empty());
    }

    #[test]
    fn test_restore_returns_to_watching() {
        let temp = TempDir::new().unwrap();
        let mut daemon = daemon_in(&temp);
        daemon.state = WatchState::Watching;
        assert_eq!(daemon.restore(0).unwrap(), SyncOutcome::Written);
        assert_eq!(daemon.state(), WatchState::Watching);
        assert_eq!(daemon.restore(0).unwrap(), SyncOutcome::Skipped);
    }
}
