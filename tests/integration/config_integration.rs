//! Integration tests for layered configuration loading

use crate::integration::test_utils::with_config_env;
use std::fs;
use strongbox::config::ConfigLoader;
use strongbox::{BackoffPolicy, DatabaseRuntime, LifecycleState, RuntimeError, StrongboxConfig};
use tempfile::TempDir;

fn write_workspace_file(workspace: &std::path::Path, name: &str, contents: &str) {
    let config_dir = workspace.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join(name), contents).unwrap();
}

fn write_global_file(test_dir: &TempDir, contents: &str) {
    let dir = test_dir.path().join("xdg").join("strongbox");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), contents).unwrap();
}

#[test]
fn test_defaults_without_any_files() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();

    let config = with_config_env(&test_dir, &[], || ConfigLoader::load(workspace.path()).unwrap());

    assert_eq!(config.runtime.max_retries, 3);
    assert_eq!(config.runtime.retry_delay_ms, 1000);
    assert_eq!(config.runtime.backoff, BackoffPolicy::Linear);
    assert_eq!(config.logging.level, "info");
    assert!(config.storage.path.is_none());
}

#[test]
fn test_global_file_is_read_from_xdg_config_home() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write_global_file(
        &test_dir,
        r#"
[runtime]
max_retries = 7
backoff = "exponential"
"#,
    );

    let config = with_config_env(&test_dir, &[], || {
        assert_eq!(
            ConfigLoader::global_config_path().unwrap(),
            test_dir.path().join("xdg").join("strongbox").join("config.toml")
        );
        ConfigLoader::load(workspace.path()).unwrap()
    });

    assert_eq!(config.runtime.max_retries, 7);
    assert_eq!(config.runtime.backoff, BackoffPolicy::Exponential);
}

#[test]
fn test_workspace_file_overrides_global() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write_global_file(
        &test_dir,
        r#"
[runtime]
max_retries = 7
max_queue_size = 50
"#,
    );
    write_workspace_file(
        workspace.path(),
        "config.toml",
        r#"
[runtime]
max_retries = 1
"#,
    );

    let config = with_config_env(&test_dir, &[], || ConfigLoader::load(workspace.path()).unwrap());

    assert_eq!(config.runtime.max_retries, 1);
    assert_eq!(config.runtime.max_queue_size, 50);
}

#[test]
fn test_environment_named_file_applies_last_among_files() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write_workspace_file(
        workspace.path(),
        "config.toml",
        r#"
[storage]
temporary = false

[logging]
level = "info"
"#,
    );
    write_workspace_file(
        workspace.path(),
        "production.toml",
        r#"
[storage]
flush_on_commit = true

[logging]
level = "warn"
format = "json"
"#,
    );

    let config = with_config_env(&test_dir, &[("STRONGBOX_ENV", "production")], || {
        ConfigLoader::load(workspace.path()).unwrap()
    });

    assert!(config.storage.flush_on_commit);
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_environment_variables_override_files() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    write_workspace_file(
        workspace.path(),
        "config.toml",
        r#"
[runtime]
max_retries = 1
"#,
    );

    let config = with_config_env(
        &test_dir,
        &[
            ("STRONGBOX__RUNTIME__MAX_RETRIES", "9"),
            ("STRONGBOX__RUNTIME__RETRY_DELAY_MS", "250"),
        ],
        || ConfigLoader::load(workspace.path()).unwrap(),
    );

    assert_eq!(config.runtime.max_retries, 9);
    assert_eq!(config.runtime.retry_delay_ms, 250);
}

#[test]
fn test_invalid_config_is_rejected_before_runtime_is_built() {
    let test_dir = TempDir::new().unwrap();
    let config_file = test_dir.path().join("strongbox.toml");
    fs::write(
        &config_file,
        r#"
[runtime]
transaction_timeout_ms = 0
retry_delay_ms = 500
max_retry_delay_ms = 100

[storage]
path = "/tmp/strongbox-test"
temporary = true
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 3);

    let err = DatabaseRuntime::from_config(&config).unwrap_err();
    match err {
        RuntimeError::Config(message) => {
            assert!(message.contains("transaction_timeout_ms"));
            assert!(message.contains("mutually exclusive"));
        }
        other => panic!("expected a config error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_runtime_from_temporary_config() {
    let mut config = StrongboxConfig::default();
    config.storage.temporary = true;
    config.runtime.retry_delay_ms = 5;
    config.runtime.max_retry_delay_ms = 20;

    let runtime = DatabaseRuntime::from_config(&config).unwrap();
    assert_eq!(runtime.options().queue.retry_delay.as_millis(), 5);
    runtime.initialize().await.unwrap();
    assert_eq!(runtime.state(), LifecycleState::Ready);
}
