use thiserror::Error;

use crate::config_manager::ConfigError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Timed out waiting for an element")]
    Timeout,

    #[error("Wait was cancelled")]
    Cancelled,

    #[error("Invalid capacity: {0} (must be greater than zero)")]
    InvalidCapacity(usize),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, QueueError>;
