//! Integration tests for the ticketflow CLI
//!
//! These tests exercise the full CLI workflow using a temporary database.
//! They verify that commands work end-to-end without mocking.

use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run ticketflow with a specific database path and user
fn run_as(args: &[&str], db_path: &Path, user: &str, role: &str) -> std::process::Output {
    let dir = db_path.parent().expect("db has a parent dir");
    Command::new(env!("CARGO_BIN_EXE_ticketflow"))
        .args(args)
        .current_dir(dir)
        .env("TICKETFLOW_DB_PATH", db_path)
        .env("TICKETFLOW_ACTOR", user)
        .env("TICKETFLOW_ROLE", role)
        .env("NO_COLOR", "1")
        .env("CLICOLOR", "0")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute ticketflow")
}

fn run_ticketflow(args: &[&str], db_path: &Path) -> std::process::Output {
    run_as(args, db_path, "alice", "Editor")
}

/// Run with --json and parse stdout
fn run_json(args: &[&str], db_path: &Path) -> Value {
    let mut full = vec!["--json"];
    full.extend_from_slice(args);
    let output = run_ticketflow(&full, db_path);
    assert!(output.status.success(), "{:?} failed: {}", args, stderr(&output));
    serde_json::from_str(&stdout(&output)).expect("stdout is JSON")
}

/// Helper to get stdout as string
fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Helper to get stderr as string
fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn new_ticket(db_path: &Path, title: &str) -> i64 {
    let ticket = run_json(&["create", title], db_path);
    ticket["id"].as_i64().expect("ticket id")
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_ticketflow"))
        .arg("--help")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("ticketflow"));
    assert!(out.contains("Ticket workflow engine"));
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_ticketflow"))
        .arg("--version")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("ticketflow"));
}

// =============================================================================
// Shell Completion Tests
// =============================================================================

#[test]
fn test_completion_zsh() {
    let output = Command::new(env!("CARGO_BIN_EXE_ticketflow"))
        .args(["completion", "zsh"])
        .output()
        .expect("Failed to execute");

    assert!(
        output.status.success(),
        "completion zsh failed: {}",
        stderr(&output)
    );
    assert!(stdout(&output).contains("#compdef ticketflow"));
}

#[test]
fn test_completion_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_ticketflow"))
        .args(["completion", "bash"])
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("_ticketflow"));
}

// =============================================================================
// Ticket Workflow Tests
// =============================================================================

#[test]
fn test_create_and_list_tickets() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");

    let output = run_ticketflow(&["create", "Broken boiler", "--blocking"], &db_path);
    assert!(output.status.success(), "create failed: {}", stderr(&output));
    assert!(stdout(&output).contains("Created ticket"));

    let output = run_ticketflow(&["create", "Squeaky door", "--code", "MNT-7"], &db_path);
    assert!(output.status.success());

    let output = run_ticketflow(&["list"], &db_path);
    assert!(output.status.success(), "list failed: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("Broken boiler"));
    assert!(out.contains("MNT-7"));
    assert!(out.contains("OPEN"));
}

#[test]
fn test_duplicate_code_fails() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    assert!(run_ticketflow(&["create", "A", "--code", "X-1"], &db_path).status.success());
    let output = run_ticketflow(&["create", "B", "--code", "X-1"], &db_path);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("already exists"));
}

#[test]
fn test_close_writes_digest() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let id = new_ticket(&db_path, "Leaky faucet");
    let id_s = id.to_string();

    assert!(run_ticketflow(&["comment", &id_s, "Washer replaced"], &db_path).status.success());
    assert!(run_ticketflow(&["status", &id_s, "CONFIRMED"], &db_path).status.success());
    let closed = run_json(&["status", &id_s, "closed", "-n", "done"], &db_path);

    assert_eq!(closed["status"], "CLOSED");
    assert!(closed["resolution_date"].is_string());
    let digest = closed["description"].as_str().unwrap();
    assert!(digest.contains("OPEN -> CONFIRMED"));
    assert!(digest.contains("CONFIRMED -> CLOSED"));
    assert!(digest.contains("Washer replaced"));
}

#[test]
fn test_invalid_transition_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let id = new_ticket(&db_path, "Fence").to_string();

    assert!(run_ticketflow(&["status", &id, "CLOSED"], &db_path).status.success());
    let output = run_ticketflow(&["status", &id, "CONFIRMED"], &db_path);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid transition CLOSED -> CONFIRMED"));

    let detail = run_json(&["show", &id], &db_path);
    assert_eq!(detail["ticket"]["status"], "CLOSED");
    assert_eq!(detail["actions"].as_array().unwrap().len(), 2);
}

#[test]
fn test_pause_and_resume() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let id = new_ticket(&db_path, "Generator").to_string();

    let pause = run_json(&["pause", &id, "waiting for fuel"], &db_path);
    let pause_id = pause["id"].as_i64().unwrap().to_string();

    let output = run_ticketflow(&["pause", &id, "again"], &db_path);
    assert!(!output.status.success());

    assert!(run_ticketflow(&["resume", &pause_id, "-n", "fuel delivered"], &db_path)
        .status
        .success());

    let detail = run_json(&["show", &id], &db_path);
    assert_eq!(detail["ticket"]["status"], "OPEN");
    assert_eq!(detail["pauses"][0]["is_active"], false);
}

#[test]
fn test_viewer_cannot_mutate() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let output = run_as(&["create", "Nope"], &db_path, "vic", "Viewer");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("may not"));
}

#[test]
fn test_soft_delete_requires_admin() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let id = new_ticket(&db_path, "Old ticket").to_string();

    assert!(!run_ticketflow(&["delete", &id], &db_path).status.success());
    assert!(run_as(&["delete", &id], &db_path, "root", "Admin").status.success());

    let live = run_json(&["list"], &db_path);
    assert_eq!(live.as_array().unwrap().len(), 0);
    let all = run_json(&["list", "--all"], &db_path);
    assert_eq!(all.as_array().unwrap().len(), 1);
}

// =============================================================================
// Progress Requests and Notifications
// =============================================================================

#[test]
fn test_progress_request_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let id = new_ticket(&db_path, "Cooling tower").to_string();

    let request = run_json(&["progress", "request", &id, "bob", "how is it going?"], &db_path);
    let request_id = request["id"].as_i64().unwrap().to_string();

    let output = run_as(&["--json", "notifications", "stats"], &db_path, "bob", "Editor");
    let stats: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(stats["pending_action"], 1);

    let output = run_as(
        &["progress", "update", &request_id, "40", "pumps checked", "--eta", "next week maybe"],
        &db_path,
        "bob",
        "Editor",
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("RFC 3339"));

    let output = run_as(
        &["--json", "progress", "update", &request_id, "40", "pumps checked", "--eta", "2026-03-06T17:00:00+02:00"],
        &db_path,
        "bob",
        "Editor",
    );
    assert!(output.status.success(), "update failed: {}", stderr(&output));
    let updated: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(updated["current_eta"], "2026-03-06T15:00:00.000000Z");
    assert!(run_as(&["progress", "respond", &request_id, "all good"], &db_path, "bob", "Editor")
        .status
        .success());

    let output = run_as(&["progress", "respond", &request_id, "twice"], &db_path, "bob", "Editor");
    assert!(!output.status.success());

    let history = run_json(&["progress", "history", &request_id], &db_path);
    assert_eq!(history.as_array().unwrap().len(), 2);

    let output = run_as(&["--json", "notifications", "stats"], &db_path, "bob", "Editor");
    let stats: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(stats["pending_action"], 0);
}

#[test]
fn test_notification_read_state_per_user() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    new_ticket(&db_path, "Global news");

    let feed = run_json(&["notifications", "list"], &db_path);
    let nid = feed[0]["id"].as_i64().unwrap().to_string();
    assert!(run_ticketflow(&["notifications", "read", &nid], &db_path).status.success());

    let unread_alice = run_json(&["notifications", "list", "--unread"], &db_path);
    assert_eq!(unread_alice.as_array().unwrap().len(), 0);

    let output = run_as(&["--json", "notifications", "list", "--unread"], &db_path, "carol", "Viewer");
    let unread_carol: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(unread_carol.as_array().unwrap().len(), 1);
}

#[test]
fn test_stats_counts_by_status() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let a = new_ticket(&db_path, "A").to_string();
    new_ticket(&db_path, "B");
    assert!(run_ticketflow(&["status", &a, "CANCELLED"], &db_path).status.success());

    let counts = run_json(&["stats"], &db_path);
    assert_eq!(counts["OPEN"], 1);
    assert_eq!(counts["CANCELLED"], 1);
    assert_eq!(counts["REOPENED"], 0);
}
