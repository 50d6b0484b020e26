//! End-to-end tests for the `uplift` binary against a directory mirror.
//!
//! Each test builds a live tree, a mirror holding the next release and a
//! config file pointing at both, then drives the CLI and inspects the JSON
//! envelope on stdout and the exit code.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn uplift() -> Command {
    let mut cmd = Command::cargo_bin("uplift").expect("uplift binary should exist");
    cmd.env_remove("UPLIFT_CONFIG")
        .env_remove("UPLIFT_CONFIG_DIR")
        .env("UPLIFT_LOG", "error");
    cmd
}

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, body) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, body).unwrap();
    }
}

fn toml_path(path: &Path) -> String {
    format!("{:?}", path.display().to_string())
}

struct Fixture {
    dir: TempDir,
    config: PathBuf,
}

impl Fixture {
    /// Live tree at 1.2.0, mirror at 1.3.0.
    fn new(extra: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("app");
        let mirror = dir.path().join("mirror");
        write_tree(
            &live,
            &[
                ("VERSION", "1.2.0\n"),
                ("main.py", "print('1.2.0')\n"),
                ("static/old.css", "old\n"),
            ],
        );
        write_tree(
            &mirror,
            &[
                ("VERSION", "1.3.0\n"),
                ("main.py", "print('1.3.0')\n"),
                ("static/new.css", "new\n"),
                ("notes.bin", "ignored by extension filter"),
            ],
        );

        let config = dir.path().join("uplift.toml");
        let text = format!(
            "updateable_dirs = [\"static\"]\n{extra}\n\n\
             [source]\nkind = \"directory\"\npath = {mirror}\n\n\
             [restart]\nkind = \"none\"\n\n\
             [paths]\nlive_dir = {live}\nstate_dir = {state}\n",
            mirror = toml_path(&mirror),
            live = toml_path(&live),
            state = toml_path(&dir.path().join(".update")),
        );
        fs::write(&config, text).unwrap();
        Self { dir, config }
    }

    fn run(&self, args: &[&str]) -> (i32, Value) {
        let output = uplift()
            .arg("--config")
            .arg(&self.config)
            .args(args)
            .output()
            .unwrap();
        let code = output.status.code().unwrap_or(-1);
        let json: Value = serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
            panic!(
                "stdout of {:?} is not JSON ({e}): {}",
                args,
                String::from_utf8_lossy(&output.stdout)
            )
        });
        (code, json)
    }

    fn live(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.dir.path().join("app").join(path)).ok()
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn check_download_apply_confirm() {
        let f = Fixture::new("");

        let (code, out) = f.run(&["check"]);
        assert_eq!(code, 1, "{out}");
        assert_eq!(out["command"], "check");
        assert_eq!(out["ok"], true);
        assert_eq!(out["exit_code"], "OK_UPDATE_AVAILABLE");
        assert_eq!(out["result"]["status"], "update_available");
        assert_eq!(out["result"]["remote"], "1.3.0");

        let (code, out) = f.run(&["download"]);
        assert_eq!(code, 0, "{out}");
        assert_eq!(out["result"]["version"], "1.3.0");

        let (code, out) = f.run(&["apply"]);
        assert_eq!(code, 0, "{out}");
        assert_eq!(f.live("main.py").unwrap(), "print('1.3.0')\n");
        assert_eq!(f.live("static/new.css").unwrap(), "new\n");
        assert!(f.live("static/old.css").is_none());
        assert!(f.live("notes.bin").is_none());

        let (_, out) = f.run(&["status"]);
        assert_eq!(out["result"]["current_version"], "1.3.0");
        assert_eq!(out["result"]["pending_verification"], true);
        assert_eq!(out["result"]["can_rollback"], true);

        let (code, out) = f.run(&["confirm"]);
        assert_eq!(code, 0, "{out}");
        assert_eq!(out["result"]["confirmed"], "1.3.0");

        let (_, out) = f.run(&["confirm"]);
        assert_eq!(out["result"], "already_confirmed");
    }

    #[test]
    fn startup_opens_window_then_rolls_back() {
        let f = Fixture::new("");
        f.run(&["check"]);
        f.run(&["download"]);
        f.run(&["apply"]);

        let (code, out) = f.run(&["startup"]);
        assert_eq!(code, 0, "{out}");
        assert_eq!(out["result"]["verdict"], "verification_window");

        let (code, out) = f.run(&["startup"]);
        assert_eq!(code, 2, "{out}");
        assert_eq!(out["exit_code"], "OK_ROLLED_BACK");
        assert_eq!(out["result"]["verdict"], "rolled_back");
        assert_eq!(f.live("main.py").unwrap(), "print('1.2.0')\n");
        assert_eq!(f.live("static/old.css").unwrap(), "old\n");
    }

    #[test]
    fn manual_rollback_exits_rolled_back() {
        let f = Fixture::new("");
        f.run(&["check"]);
        f.run(&["download"]);
        f.run(&["apply"]);

        let (code, out) = f.run(&["rollback"]);
        assert_eq!(code, 2, "{out}");
        assert_eq!(out["result"]["restored_version"], "1.2.0");
        assert_eq!(f.live("VERSION").unwrap().trim(), "1.2.0");
    }
}

mod failures {
    use super::*;

    #[test]
    fn download_before_check_is_a_precondition_error() {
        let f = Fixture::new("");
        let (code, out) = f.run(&["download"]);
        assert_eq!(code, 13, "{out}");
        assert_eq!(out["ok"], false);
        assert_eq!(out["exit_code"], "ERR_PRECONDITION");
        assert!(out["error"]["message"].is_string());
    }

    #[test]
    fn apply_with_nothing_staged_fails() {
        let f = Fixture::new("");
        let (code, out) = f.run(&["apply"]);
        assert_eq!(code, 13, "{out}");
        assert_eq!(f.live("main.py").unwrap(), "print('1.2.0')\n");
    }

    #[test]
    fn disabled_in_config_refuses_check() {
        let f = Fixture::new("enabled = false");
        let (code, out) = f.run(&["check"]);
        assert_eq!(code, 12, "{out}");
        assert_eq!(out["exit_code"], "ERR_DISABLED");
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        uplift()
            .arg("--config")
            .arg(dir.path().join("absent.toml"))
            .arg("status")
            .assert()
            .code(10)
            .stdout(predicate::str::contains("ERR_CONFIG"));
    }

    #[test]
    fn unknown_command_fails() {
        uplift()
            .arg("nonexistent-command")
            .assert()
            .failure()
            .stderr(predicate::str::contains("error"));
    }
}

mod config {
    use super::*;

    #[test]
    fn validate_accepts_fixture() {
        let f = Fixture::new("");
        let (code, out) = f.run(&["config", "validate"]);
        assert_eq!(code, 0, "{out}");
        assert_eq!(out["result"]["status"], "valid");
        assert_eq!(out["result"]["source"], "cli_argument");
    }

    #[test]
    fn validate_rejects_zero_failure_limit() {
        let f = Fixture::new("max_consecutive_failures = 0");
        let (code, out) = f.run(&["config", "validate"]);
        assert_eq!(code, 10, "{out}");
        assert!(out["error"]["message"]
            .as_str()
            .unwrap()
            .contains("max_consecutive_failures"));
    }

    #[test]
    fn show_prints_resolved_config() {
        let f = Fixture::new("");
        let (code, out) = f.run(&["config", "show"]);
        assert_eq!(code, 0);
        assert_eq!(out["result"]["config"]["source"]["kind"], "directory");
        assert_eq!(out["result"]["config"]["max_consecutive_failures"], 2);
    }

    #[test]
    fn human_format_prints_summary() {
        let f = Fixture::new("");
        uplift()
            .arg("--config")
            .arg(&f.config)
            .args(["--format", "human", "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("current:   1.2.0"));
    }
}
