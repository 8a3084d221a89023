//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

mod common;

/// Test fixture for configuration testing
struct ConfigFixture {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }
}

fn qa_cmd() -> Command {
    let mut cmd = Command::cargo_bin("twin-qa").unwrap();
    for var in [
        "TWIN_QA_CONFIG",
        "TWIN_QA_API_URL",
        "TWIN_QA_API_PREFIX",
        "TWIN_QA_RECONNECT_INTERVAL_MS",
        "TWIN_QA_LOG_LEVEL",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn validate(path: &str) -> assert_cmd::assert::Assert {
    qa_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(path)
        .assert()
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_empty_config_uses_defaults() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");

    validate(fixture.path())
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_valid_fixture() {
    let path = common::valid_config_fixture();
    validate(path.to_str().unwrap()).success();
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[api]
base_url = "https://qa.example.com"
api_prefix = "/api/v2/qa"
timeout_secs = 10

[stream]
reconnect_interval_ms = 2500
max_reconnect_attempts = 20
escalate_after_attempts = 5

[demo]
enabled = true
response_delay_ms = 200
persona_count = 12

[logging]
level = "debug"
max_files = 3
json_format = true
"#,
    );

    validate(fixture.path()).success();
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_fixture() {
    let path = common::invalid_config_fixture();
    validate(path.to_str().unwrap()).failure();
}

#[test]
fn test_invalid_url_scheme() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[api]
base_url = "ftp://qa.example.com"
"#,
    );

    validate(fixture.path())
        .failure()
        .stderr(predicate::str::contains("http:// or https://"));
}

#[test]
fn test_zero_reconnect_interval() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[stream]
reconnect_interval_ms = 0
"#,
    );

    validate(fixture.path()).failure();
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[logging]
level = "loud"
"#,
    );

    validate(fixture.path()).failure();
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[api
base_url = "http://localhost:8000"
"#,
    );

    validate(fixture.path()).failure();
}

// ─────────────────────────────────────────────────────────────────
// Config Show Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_custom() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[api]
base_url = "https://custom.example.com"

[stream]
max_reconnect_attempts = 42
"#,
    );

    qa_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("https://custom.example.com"))
        .stdout(predicate::str::contains("max_reconnect_attempts = 42"));
}

// ─────────────────────────────────────────────────────────────────
// Config Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_init_creates_valid_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nested").join("twin-qa.toml");

    qa_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(config_path.to_str().unwrap())
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration written to"));

    assert!(config_path.exists());
    validate(config_path.to_str().unwrap()).success();
}

#[test]
fn test_config_init_refuses_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[api]\n");

    qa_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(fixture.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_init_force_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[api]\nbase_url = \"http://old.example.com\"\n");

    qa_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(fixture.path())
        .arg("--force")
        .assert()
        .success();

    let content = fs::read_to_string(fixture.path()).unwrap();
    assert!(!content.contains("old.example.com"));
}

// ─────────────────────────────────────────────────────────────────
// Environment Variable Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_file() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[api]
base_url = "http://file.example.com"
"#,
    );

    qa_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .env("TWIN_QA_API_URL", "http://env.example.com")
        .env("TWIN_QA_RECONNECT_INTERVAL_MS", "750")
        .assert()
        .success()
        .stdout(predicate::str::contains("http://env.example.com"))
        .stdout(predicate::str::contains("reconnect_interval_ms = 750"));
}

#[test]
fn test_config_path_from_env() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[demo]
persona_count = 7
"#,
    );

    qa_cmd()
        .arg("config")
        .arg("show")
        .env("TWIN_QA_CONFIG", fixture.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("persona_count = 7"));
}
