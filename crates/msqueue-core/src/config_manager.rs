use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration for msqueue
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MsQueueConfig {
    /// How blocking pops wait for elements
    #[serde(default)]
    pub wait: WaitConfig,

    /// Defaults for the stress harness
    #[serde(default)]
    pub stress: StressConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How a consumer waits once the queue is observed empty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Re-poll in a tight loop. Burns a core; only useful for latency tests.
    Spin,
    /// Exponential backoff, yielding to the scheduler once it saturates.
    Backoff,
    /// Backoff first, then park until a producer signals.
    #[default]
    Park,
}

impl FromStr for WaitStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spin" => Ok(Self::Spin),
            "backoff" => Ok(Self::Backoff),
            "park" => Ok(Self::Park),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid wait strategy: {}. Must be one of: spin, backoff, park",
                other
            ))),
        }
    }
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Spin => "spin",
            Self::Backoff => "backoff",
            Self::Park => "park",
        };
        f.write_str(name)
    }
}

/// Blocking-pop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitConfig {
    #[serde(default)]
    pub strategy: WaitStrategy,

    /// Upper bound on a single park before the waiter re-checks the queue (µs)
    #[serde(default = "default_park_slice_us")]
    pub park_slice_us: u64,

    /// Timeout applied by callers that do not pass their own (ms)
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
}

impl WaitConfig {
    pub fn park_slice(&self) -> Duration {
        Duration::from_micros(self.park_slice_us)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            strategy: WaitStrategy::default(),
            park_slice_us: default_park_slice_us(),
            default_timeout_ms: None,
        }
    }
}

/// Stress harness defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StressConfig {
    #[serde(default = "default_threads")]
    pub producers: usize,

    #[serde(default = "default_threads")]
    pub consumers: usize,

    #[serde(default = "default_items_per_producer")]
    pub items_per_producer: usize,

    /// Run against the bounded queue with this capacity
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            producers: default_threads(),
            consumers: default_threads(),
            items_per_producer: default_items_per_producer(),
            capacity: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_park_slice_us() -> u64 {
    1_000
}
fn default_threads() -> usize {
    (num_cpus::get() / 2).max(1)
}
fn default_items_per_producer() -> usize {
    100_000
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration manager with file discovery and environment overrides
pub struct ConfigManager {
    config: MsQueueConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (`MSQUEUE_*`)
    /// 2. Config file (`explicit`, else `.msqueue.toml`, else `~/.msqueue/config.toml`)
    /// 3. Defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, config_path) = Self::load_config_file(explicit)?;
        let config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());
        Self::validate_config(&config)?;

        match config_path {
            Some(ref path) => info!("Loaded msqueue configuration from {}", path.display()),
            None => info!("No msqueue config file found, using defaults"),
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Wrap an already-built configuration after validating it.
    pub fn from_config(config: MsQueueConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    fn load_config_file(
        explicit: Option<&Path>,
    ) -> Result<(MsQueueConfig, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            let config = Self::read_toml_file(path)?;
            return Ok((config, Some(path.to_path_buf())));
        }

        let local_config = Path::new(".msqueue.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".msqueue").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((MsQueueConfig::default(), None))
    }

    pub fn read_toml_file(path: &Path) -> Result<MsQueueConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `MSQUEUE_*` overrides read through `lookup`. Unparseable values
    /// are logged and ignored.
    pub fn apply_env_overrides<F>(mut config: MsQueueConfig, lookup: F) -> MsQueueConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(strategy) = lookup("MSQUEUE_WAIT_STRATEGY") {
            match strategy.parse() {
                Ok(s) => config.wait.strategy = s,
                Err(e) => warn!("Ignoring MSQUEUE_WAIT_STRATEGY: {}", e),
            }
        }
        if let Some(slice) = lookup("MSQUEUE_PARK_SLICE_US") {
            match slice.parse() {
                Ok(us) => config.wait.park_slice_us = us,
                Err(_) => warn!("Ignoring MSQUEUE_PARK_SLICE_US={}", slice),
            }
        }
        if let Some(level) = lookup("MSQUEUE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = lookup("MSQUEUE_LOG_FORMAT") {
            config.logging.format = format;
        }
        if let Some(producers) = lookup("MSQUEUE_PRODUCERS") {
            if let Ok(n) = producers.parse() {
                config.stress.producers = n;
            }
        }
        if let Some(consumers) = lookup("MSQUEUE_CONSUMERS") {
            if let Ok(n) = consumers.parse() {
                config.stress.consumers = n;
            }
        }

        config
    }

    pub fn validate_config(config: &MsQueueConfig) -> Result<(), ConfigError> {
        if config.wait.park_slice_us == 0 {
            return Err(ConfigError::ValidationError(
                "wait.park_slice_us must be greater than zero".to_string(),
            ));
        }

        if config.stress.producers == 0 || config.stress.consumers == 0 {
            return Err(ConfigError::ValidationError(
                "stress.producers and stress.consumers must be at least 1".to_string(),
            ));
        }

        if config.stress.capacity == Some(0) {
            return Err(ConfigError::ValidationError(
                "stress.capacity must be greater than zero when set".to_string(),
            ));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &MsQueueConfig {
        &self.config
    }

    /// Get the path to the config file that was loaded, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Write the default configuration as TOML, creating parent directories.
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = MsQueueConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}
