//! Container health and readiness contracts of the `oscillate` binary

use std::process::Command;

fn oscillate() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_oscillate"));
    command.env_remove("OSCILLATE_CLI_CONFIG");
    command.env_remove("OSCILLATE_DB_PATH");
    command
}

#[test]
fn test_health_prints_ok() {
    let output = oscillate().arg("health").output().unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "OK\n");
}

#[test]
fn test_health_checks_database_directory() {
    let dir = tempfile::tempdir().unwrap();

    let output = oscillate()
        .arg("health")
        .env("OSCILLATE_DB_PATH", dir.path().join("oscillate.db"))
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "OK\n");

    let output = oscillate()
        .args(["health", "--db-path"])
        .arg(dir.path().join("missing").join("oscillate.db"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not writable"));
}

#[test]
fn test_ready_prints_readiness_line() {
    let output = oscillate().arg("ready").output().unwrap();

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        format!("oscillate {} ready\n", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn test_health_fails_when_daemon_is_down() {
    let output = oscillate()
        .args(["health", "--server", "http://127.0.0.1:1"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_cleanup_on_fresh_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("oscillate.db");

    let output = oscillate()
        .args(["cleanup", "--days", "7", "--output", "json", "--db-path"])
        .arg(&db)
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["deleted"], 0);
    assert_eq!(json["days"], 7);
    assert!(db.exists());
}

#[test]
fn test_unknown_guild_stats_are_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("oscillate.db");

    let output = oscillate()
        .args(["stats", "--guild-id", "9", "--output", "json", "--db-path"])
        .arg(&db)
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["statistics"]["total_tracks_played"], 0);
    assert_eq!(json["top_tracks"], serde_json::json!([]));
}
