use msqueue_core::{ConfigError, ConfigManager, MsQueueConfig, WaitStrategy};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_config_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    ConfigManager::create_default_config(&path).unwrap();
    assert!(path.exists());

    let loaded = ConfigManager::read_toml_file(&path).unwrap();
    assert_eq!(loaded, MsQueueConfig::default());
}

#[test]
fn test_partial_config_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("msqueue.toml");
    fs::write(
        &path,
        r#"
[wait]
strategy = "backoff"
default_timeout_ms = 250

[stress]
producers = 2
consumers = 5
capacity = 64
"#,
    )
    .unwrap();

    let config = ConfigManager::apply_env_overrides(
        ConfigManager::read_toml_file(&path).unwrap(),
        |_| None,
    );
    ConfigManager::validate_config(&config).unwrap();

    assert_eq!(config.wait.strategy, WaitStrategy::Backoff);
    assert_eq!(config.wait.park_slice_us, 1_000);
    assert_eq!(
        config.wait.default_timeout(),
        Some(std::time::Duration::from_millis(250))
    );
    assert_eq!(config.stress.producers, 2);
    assert_eq!(config.stress.consumers, 5);
    assert_eq!(config.stress.capacity, Some(64));
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, "pretty");
}

#[test]
fn test_explicit_path_is_recorded() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("msqueue.toml");
    ConfigManager::create_default_config(&path).unwrap();

    let manager = ConfigManager::load(Some(&path)).unwrap();
    assert_eq!(manager.config_path(), Some(path.as_path()));
}

#[test]
fn test_missing_explicit_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");

    assert!(matches!(
        ConfigManager::load(Some(&path)),
        Err(ConfigError::NotFound(_))
    ));
}

#[test]
fn test_malformed_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    fs::write(&path, "[wait]\nstrategy = \"teleport\"\n").unwrap();

    assert!(matches!(
        ConfigManager::read_toml_file(&path),
        Err(ConfigError::ParseError(_))
    ));
}
