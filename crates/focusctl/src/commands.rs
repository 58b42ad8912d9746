//! Command handlers for focusctl.

use crate::gate::{DisableDuration, GateOutcome};
use focus_common::browsers;
use focus_common::policy::ManagedKind;
use focus_common::{
    DaemonControl, FocusConfig, FocusError, PolicyDocument, PublishReport, Result, ServiceManager,
    Spawner, StartOutcome, StealthPublisher, StopOutcome, SyncOutcome,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// What `enable` changed
#[derive(Debug)]
pub struct EnableReport {
    pub policy: Vec<(ManagedKind, PathBuf, SyncOutcome)>,
    pub browsers_killed: usize,
    pub daemon: StartOutcome,
    pub replicas: Option<PublishReport>,
}

#[derive(Debug)]
pub enum DisableResult {
    /// Duration outside 1..=60; nothing was touched
    InvalidDuration(i64),
    /// Gate did not authorize; nothing was touched
    Declined(GateOutcome),
    Disabled {
        daemon: StopOutcome,
        suspended: Vec<String>,
        reenable_after: Option<DisableDuration>,
    },
}

impl DisableResult {
    /// Minutes until enforcement comes back, for a successful timed disable
    pub fn reenable_after(&self) -> Option<DisableDuration> {
        match self {
            DisableResult::Disabled { reenable_after, .. } => *reenable_after,
            _ => None,
        }
    }
}

/// Snapshot for `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub daemon_pid: Option<i32>,
    pub disguise: Option<String>,
    pub policy_path: PathBuf,
    pub policy_present: bool,
    /// None when the service manager could not be queried
    pub replicas: Option<usize>,
}

impl StatusReport {
    pub fn is_active(&self) -> bool {
        self.daemon_pid.is_some() && self.policy_present
    }
}

/// Everything enforcement touches, wired to one config
pub struct Focus<'a> {
    config: &'a FocusConfig,
    manager: &'a dyn ServiceManager,
    spawner: &'a dyn Spawner,
    control: DaemonControl,
}

impl<'a> Focus<'a> {
    pub fn new(
        config: &'a FocusConfig,
        manager: &'a dyn ServiceManager,
        spawner: &'a dyn Spawner,
    ) -> Self {
        let control = DaemonControl::new(
            config.daemon.lock_path.clone(),
            config.daemon.identity_path(),
        );
        Self {
            config,
            manager,
            spawner,
            control,
        }
    }

    pub fn control(&self) -> &DaemonControl {
        &self.control
    }

    fn publisher(&self) -> StealthPublisher<'_, dyn ServiceManager + 'a> {
        StealthPublisher::new(&self.config.replicas, self.manager)
    }

    /// Write the policy, clear out running browsers, start the watchers
    pub fn enable(&self) -> Result<EnableReport> {
        let document = PolicyDocument::from_config(self.config)?;
        let policy = document
            .apply(&self.config.daemon.backup_dir())?
            .into_iter()
            .map(|(file, outcome)| (file.kind, file.path, outcome))
            .collect();

        let browsers_killed = browsers::kill_browsers(&self.config.browsers.kill_list);
        let daemon = self.control.start(self.spawner)?;

        let replicas = if self.config.replicas.count > 0 {
            let binary = self.config.daemon.binary_path();
            Some(self.publish(&binary, self.config.replicas.count)?)
        } else {
            None
        };

        info!("Enforcement enabled");
        Ok(EnableReport {
            policy,
            browsers_killed,
            daemon,
            replicas,
        })
    }

    /// Validate, run the gate, then tear down. `gate` only runs for a valid duration.
    pub fn disable<G>(&self, minutes: Option<i64>, gate: G) -> Result<DisableResult>
    where
        G: FnOnce(Option<DisableDuration>) -> Result<GateOutcome>,
    {
        let duration = match minutes.map(DisableDuration::new).transpose() {
            Ok(d) => d,
            Err(FocusError::InvalidDuration(m)) => return Ok(DisableResult::InvalidDuration(m)),
            Err(e) => return Err(e),
        };

        let outcome = gate(duration)?;
        if !outcome.authorizes_disable() {
            info!("Disable declined: {:?}", outcome);
            return Ok(DisableResult::Declined(outcome));
        }

        let daemon = self.control.stop()?;
        let suspended = self.publisher().suspend()?;
        PolicyDocument::from_config(self.config)?.release(&self.config.daemon.backup_dir())?;

        info!("Enforcement disabled");
        Ok(DisableResult::Disabled {
            daemon,
            suspended,
            reenable_after: duration,
        })
    }

    /// Wait out a timed disable, then run `enable` again
    ///
    /// Only a `Disabled` result with a duration re-enables; `sleep` is not
    /// called otherwise. There is no way to cut the wait short.
    pub fn reenable_after<S>(&self, result: &DisableResult, sleep: S) -> Result<Option<EnableReport>>
    where
        S: FnOnce(Duration),
    {
        let Some(duration) = result.reenable_after() else {
            return Ok(None);
        };
        sleep(duration.as_duration());
        info!("Disable window of {} minutes over, re-enabling", duration.minutes());
        self.enable().map(Some)
    }

    /// Never fails: anything unreadable is reported as absent
    pub fn status(&self) -> StatusReport {
        let daemon_pid = self.control.running_pid();
        let disguise = daemon_pid
            .and_then(|_| self.control.identity())
            .map(|identity| identity.process_name);

        let policy_path = self.config.policy.path.clone();
        let policy_present = policy_path.is_file();

        let replicas = match self.publisher().deployed() {
            Ok(deployed) => Some(deployed.len()),
            Err(e) => {
                warn!("Could not list replicas: {}", e);
                None
            }
        };

        StatusReport {
            daemon_pid,
            disguise,
            policy_path,
            policy_present,
            replicas,
        }
    }

    pub fn publish(&self, binary: &Path, count: usize) -> Result<PublishReport> {
        self.publisher().publish(binary, count)
    }
}
