//! End-to-end tests running the `dt` binary against a temporary database.
//!
//! Each command is a separate process, so state only survives through the
//! SQLite store (and the cache file when one is configured).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde_json::Value;
use tempfile::TempDir;

fn dt_binary() -> String {
    env!("CARGO_BIN_EXE_dt").to_string()
}

struct Env {
    temp: TempDir,
    cache: Option<PathBuf>,
}

impl Env {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
            cache: None,
        }
    }

    fn with_cache() -> Self {
        let mut env = Self::new();
        env.cache = Some(env.temp.path().join("cache.db"));
        env
    }

    fn home(&self) -> &Path {
        self.temp.path()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(dt_binary());
        command
            .env("HOME", self.home())
            .env_remove("XDG_CONFIG_HOME")
            .env_remove("DT_CACHE_PATH")
            .env_remove("DT_REMOVE_COMPLETED")
            .env("DT_DATABASE_PATH", self.home().join("data/dt.db"));
        if let Some(cache) = &self.cache {
            command.env("DT_CACHE_PATH", cache);
        }
        command
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().expect("failed to run dt")
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "dt {args:?} should succeed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).unwrap()
    }

    fn list_json(&self, group: &str) -> Vec<Value> {
        let stdout = self.run_ok(&["list", group, "--json"]);
        let entries: Vec<Value> = serde_json::from_str(&stdout).unwrap();
        entries
            .into_iter()
            .flat_map(|entry| entry["trackers"].as_array().cloned().unwrap_or_default())
            .collect()
    }
}

fn progress_of(trackers: &[Value], name: &str) -> Option<f64> {
    trackers
        .iter()
        .find(|t| t["name"] == name)
        .and_then(|t| t["progress"].as_f64())
}

#[test]
fn test_add_track_list_flow() {
    let env = Env::new();

    let stdout = env.run_ok(&[
        "add",
        "shop",
        r#"[
            {"name": "orders", "kind": "count", "targets": [2, 5]},
            {"name": "spend", "kind": "accumulation", "key": "order.total", "targets": [100]}
        ]"#,
    ]);
    assert_eq!(
        stdout,
        "Added tracker orders to group shop\nAdded tracker spend to group shop\n"
    );

    env.run_ok(&["track", "shop", r#"{"order": {"total": 40}}"#]);
    let stdout = env.run_ok(&["track", "shop", r#"{"order": {"total": 25}}"#]);
    assert!(stdout.starts_with("Group shop: 2 updated, 0 completed, 0 limited"));

    let trackers = env.list_json("shop");
    assert_eq!(progress_of(&trackers, "orders"), Some(2.0));
    assert_eq!(progress_of(&trackers, "spend"), Some(65.0));

    // Crossing the final target removes the tracker.
    let stdout = env.run_ok(&["track", "shop", r#"{"order": {"total": 50}}"#]);
    assert!(stdout.starts_with("Group shop: 2 updated, 1 completed, 0 limited"));
    let trackers = env.list_json("shop");
    assert_eq!(progress_of(&trackers, "spend"), None);
    assert_eq!(progress_of(&trackers, "orders"), Some(3.0));
}

#[test]
fn test_reset_and_remove() {
    let env = Env::new();
    env.run_ok(&[
        "add",
        "g",
        r#"{"name": "visits", "kind": "count", "targets": [10]}"#,
    ]);
    env.run_ok(&["track", "g", "{}"]);
    env.run_ok(&["track", "g", "{}"]);
    assert_eq!(progress_of(&env.list_json("g"), "visits"), Some(2.0));

    let stdout = env.run_ok(&["reset", "g", "visits"]);
    assert!(stdout.starts_with("Reset all of tracker visits in group g: 0/10"));
    assert_eq!(progress_of(&env.list_json("g"), "visits"), Some(0.0));

    let output = env.run(&["reset", "g", "missing"]);
    assert!(!output.status.success());

    let stdout = env.run_ok(&["remove", "g", "visits"]);
    assert_eq!(stdout, "Removed tracker visits from group g\n");
    assert!(env.list_json("g").is_empty());
}

#[test]
fn test_add_rejects_invalid_definition() {
    let env = Env::new();
    let output = env.run(&[
        "add",
        "g",
        r#"[
            {"name": "ok", "kind": "count", "targets": [1, 2]},
            {"name": "bad", "kind": "count", "targets": [3, 2]}
        ]"#,
    ]);
    assert!(!output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Added tracker ok to group g"));
    assert!(stdout.contains("Rejected:"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("1 tracker(s) rejected"));

    // The valid tracker was still stored.
    assert_eq!(progress_of(&env.list_json("g"), "ok"), Some(0.0));
}

#[test]
fn test_flush_requires_confirmation() {
    let env = Env::new();
    env.run_ok(&["add", "a", r#"{"name": "t", "kind": "count", "targets": [3]}"#]);
    env.run_ok(&["add", "b", r#"{"name": "t", "kind": "count", "targets": [3]}"#]);

    let output = env.run(&["flush"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--yes"));
    assert_eq!(env.run_ok(&["list"]).lines().count(), 3);

    assert_eq!(env.run_ok(&["flush", "--yes"]), "Flushed all tracker groups\n");
    assert_eq!(env.run_ok(&["list"]), "No trackers.\n");
}

#[test]
fn test_replay_from_stdin_with_cache_file() {
    let env = Env::with_cache();
    for group in ["alice", "bob"] {
        env.run_ok(&[
            "add",
            group,
            r#"{"name": "steps", "kind": "accumulation", "key": "n", "targets": [5, 100]}"#,
        ]);
    }

    let mut child = env
        .command()
        .args(["replay", "-", "--json"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(
            concat!(
                "{\"group\": \"alice\", \"event\": {\"n\": 3}}\n",
                "{\"group\": \"bob\", \"event\": {\"n\": 1}}\n",
                "{\"group\": \"alice\", \"event\": {\"n\": 4}}\n",
            )
            .as_bytes(),
        )
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "replay should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summaries: Vec<Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0]["group"], "alice");
    assert_eq!(summaries[0]["events"], 2);
    assert_eq!(summaries[1]["group"], "bob");

    let alice = env.list_json("alice");
    assert_eq!(progress_of(&alice, "steps"), Some(7.0));
    assert_eq!(alice[0]["stage"], 1);
    assert_eq!(progress_of(&env.list_json("bob"), "steps"), Some(1.0));
    assert!(env.cache.as_ref().is_some_and(|p| p.exists()));
}
