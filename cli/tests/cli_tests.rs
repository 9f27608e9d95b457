use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A command run from an empty directory with no stack variables set
fn stackc(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("stackc").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("STACK_CONFIG")
        .env_remove("STACK_NAME")
        .env_remove("STACK_ACCOUNT")
        .env_remove("STACK_REGION")
        .env_remove("STACK_DOMAIN_PREFIX")
        .env_remove("STACK_PORT");
    cmd
}

fn write_config(dir: &TempDir, content: &str) -> String {
    let path = dir.path().join("stack.yaml");
    fs::write(&path, content).unwrap();
    path.display().to_string()
}

#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stack CLI"))
        .stdout(predicate::str::contains("synth"));
}

#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stackc"));
}

#[test]
fn test_synth_json() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .arg("synth")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stack_name\": \"CdkStackDavidStack\""))
        .stdout(predicate::str::contains("myRestApi"))
        .stdout(predicate::str::contains("myAuthenticatedRole_RestApi"));
}

#[test]
fn test_synth_yaml() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .args(["synth", "--format", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stack_name: CdkStackDavidStack"));
}

#[test]
fn test_synth_text_lists_resources() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .args(["synth", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("myDynamoDb_table"))
        .stdout(predicate::str::contains("Total resources"));
}

#[test]
fn test_synth_with_config_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "stack_name: OtherStack\nregion: eu-west-1\n");
    stackc(&dir)
        .args(["--config", &path, "synth"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OtherStack"))
        .stdout(predicate::str::contains("eu-west-1"));
}

#[test]
fn test_synth_env_override() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .env("STACK_NAME", "EnvStack")
        .arg("synth")
        .assert()
        .success()
        .stdout(predicate::str::contains("EnvStack"));
}

#[test]
fn test_validate_reference_stack() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("VALID"))
        .stdout(predicate::str::contains("ACCESS_SEPARATION"));
}

#[test]
fn test_validate_json() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .args(["validate", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"trusted_roles\""))
        .stdout(predicate::str::contains("\"status\": \"valid\""));
}

#[test]
fn test_validate_rejects_bad_lifetimes() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "token_validity:\n  auth_session_minutes: 15\n  access_token_minutes: 10\n",
    );
    stackc(&dir)
        .args(["--config", &path, "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("INVALID"));
}

#[test]
fn test_synth_rejects_bad_domain_prefix() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "domain_prefix: my-cognito-domain\n");
    stackc(&dir)
        .args(["--config", &path, "synth"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid"));
}

#[test]
fn test_config_yaml() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .args(["config", "--format", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("domain_prefix: cdkstackdavidcogdom"))
        .stdout(predicate::str::contains("refresh_token_days: 30"));
}

#[test]
fn test_config_text() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stack Configuration"))
        .stdout(predicate::str::contains("https://example.com/callback"));
}

#[test]
fn test_token_direct_sign_in() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .arg("token")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"access_token\""))
        .stdout(predicate::str::contains("\"refresh_token\""));
}

#[test]
fn test_token_with_scopes() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .args(["token", "--scope", "openid", "--scope", "email"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id_token\""));
}

#[test]
fn test_token_unknown_scope_fails() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .args(["token", "--scope", "admin"])
        .assert()
        .failure();
}

#[test]
fn test_health_offline_gateway() {
    let dir = TempDir::new().unwrap();
    stackc(&dir)
        .args(["health", "--url", "http://127.0.0.1:9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OFFLINE"));
}
