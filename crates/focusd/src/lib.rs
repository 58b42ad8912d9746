//! focusd library - exposes modules for testing

pub mod process_name;
pub mod watcher;

pub use watcher::{ComplianceDaemon, Tamper, WatchState};
