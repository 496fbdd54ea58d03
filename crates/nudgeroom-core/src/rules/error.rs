//! Rule-specific errors.

use thiserror::Error;

/// Errors that can occur in rule operations
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Failed to read/write rules file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse rules TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize rules TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Failed to access data directory: {0}")]
    DataDirError(String),
}

pub type Result<T, E = RuleError> = std::result::Result<T, E>;
