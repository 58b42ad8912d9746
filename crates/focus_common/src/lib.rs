//! focus_common - shared core for focusd and focusctl
//!
//! Policy rendering and atomic sync, obfuscated daemon identity, daemon
//! lock control, and the service replica publisher.

pub mod browsers;
pub mod config;
pub mod daemon_control;
pub mod error;
pub mod identity;
pub mod policy;
pub mod replicas;
pub mod store;

pub use config::FocusConfig;
pub use daemon_control::{DaemonControl, DetachedSpawner, Spawner, StartOutcome, StopOutcome};
pub use error::{FocusError, Result};
pub use identity::{DaemonIdentity, IdentityObfuscator};
pub use policy::{ManagedFile, ManagedKind, PolicyDocument, Rule};
pub use replicas::{PublishReport, ServiceManager, ServiceReplica, StealthPublisher, Systemd};
pub use store::SyncOutcome;
