//! binlog2sql Error Types

use thiserror::Error;

/// Result type alias for binlog2sql operations
pub type Result<T> = std::result::Result<T, Error>;

/// binlog2sql error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Event errors
    #[error("Unsupported binlog event: {0}")]
    UnsupportedEvent(String),

    #[error("Failed to decode binlog event: {0}")]
    BinlogDecode(String),

    // Source errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Replication stream error: {0}")]
    Binlog(#[from] mysql_async::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error was caused by the scan request rather than the source
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
    }

    /// Build a configuration error
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}
