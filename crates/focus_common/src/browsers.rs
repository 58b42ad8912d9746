//! Browser sweep
//!
//! Kills browsers that would otherwise keep running without the new policy.

use sysinfo::System;
use tracing::{debug, info};

/// Kill every process whose name exactly matches an entry in `kill_list`
///
/// Returns how many processes were signalled.
pub fn kill_browsers(kill_list: &[String]) -> usize {
    if kill_list.is_empty() {
        return 0;
    }

    let mut system = System::new();
    system.refresh_processes();

    let mut killed = 0;
    for name in kill_list {
        for process in system.processes_by_exact_name(name) {
            if process.kill() {
                debug!("Killed {} (pid {})", name, process.pid());
                killed += 1;
            }
        }
    }
    if killed > 0 {
        info!("Killed {} browser processes", killed);
    }
    killed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_kills_nothing() {
        assert_eq!(kill_browsers(&[]), 0);
    }

    #[test]
    fn test_unknown_name_kills_nothing() {
        assert_eq!(kill_browsers(&["no-such-browser-3f9a".to_string()]), 0);
    }
}
