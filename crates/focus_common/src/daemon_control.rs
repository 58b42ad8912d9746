//! Compliance daemon control (CLI side)
//!
//! Start/stop/liveness for the detached watch process. The lock file is a
//! single line holding the daemon pid. Liveness is decided by the pid, never
//! by the file alone: a lock left behind by a killed daemon counts as
//! "not running".
//!
//! `start` is check-then-act. Two concurrent starts can both see "not
//! running" and launch two daemons; acceptable with a single operator.

use crate::error::{FocusError, Result};
use crate::identity::{DaemonIdentity, IdentityObfuscator};
use crate::store;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long `stop` waits for the daemon to exit after SIGTERM
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Check if a process exists by sending signal 0
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Launches the watch process under a given name
pub trait Spawner {
    /// Returns the pid of the new process
    fn spawn(&self, process_name: &str) -> Result<i32>;
}

/// Runs the watch binary in its own session so it outlives the CLI
#[derive(Debug, Clone)]
pub struct DetachedSpawner {
    pub binary: PathBuf,
    pub config_path: Option<PathBuf>,
}

impl Spawner for DetachedSpawner {
    fn spawn(&self, process_name: &str) -> Result<i32> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg0(process_name)
            .args(["--name", process_name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(config) = &self.config_path {
            cmd.arg("--config").arg(config);
        }
        // SAFETY: setsid is async-signal-safe and touches no shared state
        unsafe {
            cmd.pre_exec(|| nix::unistd::setsid().map(drop).map_err(std::io::Error::from));
        }

        let child = cmd
            .spawn()
            .map_err(|e| FocusError::io("spawn", &self.binary, e))?;
        Ok(child.id() as i32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning { pid: i32 },
    Started(DaemonIdentity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No lock file
    NotRunning,
    /// Signalled a live daemon
    Stopped { pid: i32 },
    /// Lock pointed at a dead or unreadable pid
    StaleLockRemoved,
}

/// Lock and identity files for the compliance daemon
#[derive(Debug, Clone)]
pub struct DaemonControl {
    lock_path: PathBuf,
    identity_path: PathBuf,
    obfuscator: IdentityObfuscator,
}

impl DaemonControl {
    pub fn new(lock_path: impl Into<PathBuf>, identity_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
            identity_path: identity_path.into(),
            obfuscator: IdentityObfuscator,
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Pid recorded in the lock file, if the file exists
    pub fn read_lock(&self) -> Result<Option<i32>> {
        let content = match fs::read_to_string(&self.lock_path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FocusError::io("read", &self.lock_path, e)),
        };
        content
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|_| FocusError::CorruptLock {
                path: self.lock_path.clone(),
                content,
            })
    }

    /// Pid of the live daemon, if any
    pub fn running_pid(&self) -> Option<i32> {
        match self.read_lock() {
            Ok(Some(pid)) if pid_alive(pid) => Some(pid),
            Ok(_) => None,
            Err(e) => {
                debug!("Treating lock as stale: {}", e);
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    /// Disguise of the current daemon, if one is recorded
    pub fn identity(&self) -> Option<DaemonIdentity> {
        DaemonIdentity::load(&self.identity_path).ok().flatten()
    }

    /// Launch the daemon unless a live one already holds the lock
    pub fn start(&self, spawner: &dyn Spawner) -> Result<StartOutcome> {
        if let Some(pid) = self.running_pid() {
            info!("Daemon already running (pid {})", pid);
            return Ok(StartOutcome::AlreadyRunning { pid });
        }

        let process_name = self.obfuscator.generate_name();
        let pid = spawner.spawn(&process_name)?;
        store::atomic_write(&self.lock_path, format!("{}\n", pid).as_bytes())?;

        let identity = DaemonIdentity::new(process_name, self.lock_path.clone(), pid);
        if let Err(e) = identity.save(&self.identity_path) {
            // The lock alone is enough to find and stop the daemon
            warn!("Failed to record daemon identity: {}", e);
        }
        info!("Daemon started (pid {})", pid);
        Ok(StartOutcome::Started(identity))
    }

    /// Terminate the daemon if alive and wait for it to exit
    ///
    /// The lock is removed once the process is gone or was never alive. A
    /// daemon that outlives [`STOP_TIMEOUT`] keeps its lock and is an error.
    pub fn stop(&self) -> Result<StopOutcome> {
        self.stop_within(STOP_TIMEOUT)
    }

    pub fn stop_within(&self, timeout: Duration) -> Result<StopOutcome> {
        let outcome = match self.read_lock() {
            Ok(None) => return Ok(StopOutcome::NotRunning),
            Ok(Some(pid)) if pid_alive(pid) => {
                kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(|e| {
                    FocusError::io("signal", &self.lock_path, std::io::Error::from(e))
                })?;
                info!("Sent SIGTERM to daemon (pid {})", pid);
                if !wait_for_exit(pid, timeout) {
                    warn!("Daemon (pid {}) still alive after {:?}", pid, timeout);
                    return Err(FocusError::StopTimeout { pid });
                }
                StopOutcome::Stopped { pid }
            }
            Ok(Some(_)) | Err(FocusError::CorruptLock { .. }) => StopOutcome::StaleLockRemoved,
            Err(e) => return Err(e),
        };

        store::remove(&self.lock_path)?;
        DaemonIdentity::clear(&self.identity_path)?;
        Ok(outcome)
    }
}

/// Poll until `pid` is gone; false if it is still alive at the deadline
fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !pid_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Records spawn requests and reports a fixed pid
    struct FakeSpawner {
        pid: i32,
        spawned: RefCell<Vec<String>>,
    }

    impl FakeSpawner {
        fn new(pid: i32) -> Self {
            Self {
                pid,
                spawned: RefCell::new(Vec::new()),
            }
        }
    }

    impl Spawner for FakeSpawner {
        fn spawn(&self, process_name: &str) -> Result<i32> {
            self.spawned.borrow_mut().push(process_name.to_string());
            Ok(self.pid)
        }
    }

    fn dead_pid() -> i32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        pid
    }

    fn control(temp: &TempDir) -> DaemonControl {
        DaemonControl::new(temp.path().join("daemon.lock"), temp.path().join("identity.json"))
    }

    #[test]
    fn test_pid_alive() {
        assert!(pid_alive(std::process::id() as i32));
        assert!(!pid_alive(dead_pid()));
        assert!(!pid_alive(0));
        assert!(!pid_alive(-1));
    }

    #[test]
    fn test_start_without_lock_spawns_and_records() {
        let temp = TempDir::new().unwrap();
        let control = control(&temp);
        let spawner = FakeSpawner::new(std::process::id() as i32);

        let outcome = control.start(&spawner).unwrap();
        let StartOutcome::Started(identity) = outcome else {
            panic!("expected a fresh start");
        };
        assert_eq!(spawner.spawned.borrow().len(), 1);
        assert_eq!(identity.process_name, spawner.spawned.borrow()[0]);
        assert_eq!(control.read_lock().unwrap(), Some(std::process::id() as i32));
        assert_eq!(control.identity(), Some(identity));
    }

    #[test]
    fn test_start_with_live_lock_is_noop() {
        let temp = TempDir::new().unwrap();
        let control = control(&temp);
        let own = std::process::id() as i32;
        fs::write(control.lock_path(), format!("{}\n", own)).unwrap();

        let spawner = FakeSpawner::new(1234);
        assert_eq!(
            control.start(&spawner).unwrap(),
            StartOutcome::AlreadyRunning { pid: own }
        );
        assert!(spawner.spawned.borrow().is_empty());
    }

    #[test]
    fn test_stale_lock_treated_as_missing() {
        let temp = TempDir::new().unwrap();
        let control = control(&temp);
        fs::write(control.lock_path(), format!("{}\n", dead_pid())).unwrap();
        assert!(!control.is_running());

        let spawner = FakeSpawner::new(std::process::id() as i32);
        assert!(matches!(control.start(&spawner).unwrap(), StartOutcome::Started(_)));
        assert_eq!(spawner.spawned.borrow().len(), 1);
    }

    #[test]
    fn test_corrupt_lock_treated_as_missing() {
        let temp = TempDir::new().unwrap();
        let control = control(&temp);
        fs::write(control.lock_path(), "not a pid").unwrap();
        assert!(!control.is_running());
        assert_eq!(control.stop().unwrap(), StopOutcome::StaleLockRemoved);
        assert!(!control.lock_path().exists());
    }

    #[test]
    fn test_stop_without_lock() {
        let temp = TempDir::new().unwrap();
        assert_eq!(control(&temp).stop().unwrap(), StopOutcome::NotRunning);
    }

    #[test]
    fn test_stop_terminates_live_daemon() {
        let temp = TempDir::new().unwrap();
        let control = control(&temp);
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as i32;
        fs::write(control.lock_path(), format!("{}\n", pid)).unwrap();
        // Reap as soon as it dies so the pid does not linger as a zombie
        let reaper = std::thread::spawn(move || child.wait().unwrap());

        assert_eq!(control.stop().unwrap(), StopOutcome::Stopped { pid });
        assert!(!pid_alive(pid));
        assert!(!reaper.join().unwrap().success());
        assert!(!control.lock_path().exists());
    }

    #[test]
    fn test_stop_keeps_lock_when_daemon_ignores_sigterm() {
        let temp = TempDir::new().unwrap();
        let control = control(&temp);
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        let pid = child.id() as i32;
        fs::write(control.lock_path(), format!("{}\n", pid)).unwrap();
        std::thread::sleep(Duration::from_millis(300));

        let result = control.stop_within(Duration::from_millis(300));
        assert!(matches!(result, Err(FocusError::StopTimeout { pid: p }) if p == pid));
        assert_eq!(control.read_lock().unwrap(), Some(pid));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_stop_removes_stale_lock() {
        let temp = TempDir::new().unwrap();
        let control = control(&temp);
        fs::write(control.lock_path(), format!("{}\n", dead_pid())).unwrap();
        assert_eq!(control.stop().unwrap(), StopOutcome::StaleLockRemoved);
        assert!(!control.lock_path().exists());
    }
}
