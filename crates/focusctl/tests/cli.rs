//! End-to-end checks of the focusctl binary against a temp config

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// The only quote the gate can pick: the endpoint is unreachable
const QUOTE: &str = "Stay focused. - Me";

struct Sandbox {
    temp: TempDir,
    config: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let config = root.join("config.toml");
        fs::write(
            &config,
            format!(
                r#"
[policy]
path = "{root}/policies/managed_policies.json"

[daemon]
lock_path = "{root}/daemon.lock"
state_dir = "{root}/state"

[replicas]
count = 0
unit_dir = "{root}/units"
bin_dir = "{root}/bin"

[browsers]
kill_list = []

[quote]
endpoint = "http://127.0.0.1:9/random"
timeout_secs = 1
fallbacks = ["{quote}"]
"#,
                root = root.display(),
                quote = QUOTE
            ),
        )
        .unwrap();
        Self { temp, config }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.temp.path().join(rel)
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_focusctl"))
            .arg("--config")
            .arg(&self.config)
            .args(args)
            .output()
            .unwrap()
    }

    fn run_with_stdin(&self, args: &[&str], input: &str) -> Output {
        let mut child = Command::new(env!("CARGO_BIN_EXE_focusctl"))
            .arg("--config")
            .arg(&self.config)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        // The gate may refuse before reading, closing the pipe early
        let _ = child.stdin.take().unwrap().write_all(input.as_bytes());
        child.wait_with_output().unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn seed(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_status_succeeds_with_nothing_running() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["status"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("INACTIVE"));
}

#[test]
fn test_out_of_range_duration_rejected_without_changes() {
    let sandbox = Sandbox::new();
    let policy = sandbox.path("policies/managed_policies.json");
    let lock = sandbox.path("daemon.lock");
    seed(&policy, "{\"ExtensionInstallForcelist\": []}");
    seed(&lock, &format!("{}\n", std::process::id()));

    for minutes in ["0", "61", "-5"] {
        let output = sandbox.run(&["disable", "--duration", minutes]);
        assert!(output.status.success(), "exit status for {}", minutes);
        assert!(stdout(&output).contains("Duration must be between 1 and 60 minutes"));
    }

    assert_eq!(
        fs::read_to_string(&policy).unwrap(),
        "{\"ExtensionInstallForcelist\": []}"
    );
    assert_eq!(
        fs::read_to_string(&lock).unwrap(),
        format!("{}\n", std::process::id())
    );
}

#[test]
fn test_non_numeric_duration_is_usage_error() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["disable", "--duration", "soon"]);
    assert!(!output.status.success());
}

#[test]
fn test_status_survives_broken_config() {
    let sandbox = Sandbox::new();
    fs::write(&sandbox.config, "[policy\n").unwrap();
    let output = sandbox.run(&["status"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("config error"));
}

#[test]
fn test_other_commands_fail_on_broken_config() {
    let sandbox = Sandbox::new();
    fs::write(&sandbox.config, "[policy\n").unwrap();
    assert!(!sandbox.run(&["enable"]).status.success());
}

#[test]
fn test_piped_quote_does_not_disable() {
    let sandbox = Sandbox::new();
    let policy = sandbox.path("policies/managed_policies.json");
    let lock = sandbox.path("daemon.lock");
    seed(&policy, "{\"ExtensionInstallForcelist\": [\"abc\"]}");
    seed(&lock, &format!("{}\n", std::process::id()));

    let output = sandbox.run_with_stdin(&["disable"], &format!("{}\n", QUOTE));
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("interactive terminal"));
    assert!(!out.contains("Focus mode disabled"));

    assert_eq!(
        fs::read_to_string(&policy).unwrap(),
        "{\"ExtensionInstallForcelist\": [\"abc\"]}"
    );
    assert_eq!(
        fs::read_to_string(&lock).unwrap(),
        format!("{}\n", std::process::id())
    );
}
