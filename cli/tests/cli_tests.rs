use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A `keystone` command isolated in its own working directory and database.
fn keystone(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("keystone").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("KEYSTONE_CONFIG")
        .env_remove("KEYSTONE_PORT")
        .env_remove("KEYSTONE_SESSION_ID")
        .env_remove("KEYSTONE_SECRET")
        .env_remove("KEYSTONE_PASSWORD")
        .env("NO_COLOR", "1")
        .env("DATA_PATH", dir.path().join("data"))
        .env("KEYSTONE_DATABASE_PATH", dir.path().join("data/keystone.db"));
    cmd
}

#[test]
fn test_help() {
    let dir = TempDir::new().unwrap();
    keystone(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("sign"))
        .stdout(predicate::str::contains("acl"));
}

#[test]
fn test_sign_known_request() {
    let dir = TempDir::new().unwrap();
    keystone(&dir)
        .args([
            "sign",
            "GET",
            "/api/v1/whoami",
            "--host",
            "example.com",
            "--session-id",
            "abc",
            "--secret",
            "s3cr3t",
            "--timestamp",
            "20240101T000000Z",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "authorization: Keystone-HMAC-SHA256 Credential=abc,\
             SignedHeaders=host;x-keystone-content-sha256;x-keystone-timestamp,\
             Signature=3eb6ff838ac24a5541d216e448abc18db285db331183b07fc56491f72f013653",
        ))
        .stdout(predicate::str::contains("x-keystone-timestamp: 20240101T000000Z"));
}

#[test]
fn test_sign_reads_credential_from_env() {
    let dir = TempDir::new().unwrap();
    let output = keystone(&dir)
        .env("KEYSTONE_SESSION_ID", "abc")
        .env("KEYSTONE_SECRET", "s3cr3t")
        .args([
            "sign",
            "GET",
            "https://example.com/api/v1/whoami",
            "--timestamp",
            "20240101T000000Z",
            "--format",
            "json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let headers: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(headers["authorization"]
        .as_str()
        .unwrap()
        .ends_with("Signature=3eb6ff838ac24a5541d216e448abc18db285db331183b07fc56491f72f013653"));
}

#[test]
fn test_sign_rejects_bad_timestamp() {
    let dir = TempDir::new().unwrap();
    keystone(&dir)
        .args([
            "sign", "GET", "/x", "--host", "h", "--session-id", "abc", "--secret", "s", "--timestamp",
            "yesterday",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid timestamp"));
}

#[test]
fn test_user_and_role_administration() {
    let dir = TempDir::new().unwrap();

    keystone(&dir)
        .args(["role", "add", "editor", "--description", "Edits notes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created role editor"));

    keystone(&dir)
        .args(["role", "add", "editor"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    keystone(&dir)
        .env("KEYSTONE_PASSWORD", "hunter22")
        .args(["user", "add", "alice", "--role", "user", "--role", "editor"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created user alice"))
        .stdout(predicate::str::contains("user, editor"));

    keystone(&dir)
        .args(["user", "add", "alice", "--password", "other"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    keystone(&dir)
        .args(["user", "add", "bob", "--password", "pw", "--role", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("role 'missing' does not exist"));

    assert!(dir.path().join("data/keystone.db").exists());
}

#[test]
fn test_acl_grant() {
    let dir = TempDir::new().unwrap();
    let grant = [
        "acl",
        "grant",
        "--resource",
        "note",
        "--record-id",
        "1",
        "--record-id",
        "2",
        "--role",
        "anonymous",
        "--permission",
        "read",
        "--permission",
        "update",
    ];

    keystone(&dir)
        .args(grant)
        .assert()
        .success()
        .stdout(predicate::str::contains("4 access-control entries on note"));

    // Duplicates are rejected, never merged.
    keystone(&dir)
        .args(grant)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate access-control entry"));

    keystone(&dir)
        .args(["acl", "grant", "--resource", "note", "--record-id", "1", "--role", "admin", "--permission", "write"])
        .assert()
        .failure();
}

#[test]
fn test_explicit_config_must_exist() {
    let dir = TempDir::new().unwrap();
    keystone(&dir)
        .args(["--config", "missing.yaml", "role", "add", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_config_file_database_path() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("config")).unwrap();
    fs::write(
        dir.path().join("config/keystone.yaml"),
        "database:\n  path: custom/keys.db\n",
    )
    .unwrap();

    keystone(&dir)
        .env_remove("KEYSTONE_DATABASE_PATH")
        .args(["role", "add", "auditor"])
        .assert()
        .success();
    assert!(dir.path().join("custom/keys.db").exists());
}

#[test]
fn test_health_unreachable_server() {
    let dir = TempDir::new().unwrap();
    keystone(&dir)
        .args(["health", "--url", "http://127.0.0.1:9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not reachable"));
}
