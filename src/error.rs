//! Barrel Error Types

use thiserror::Error;

/// Result type alias for Barrel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Barrel error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Store errors
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Record corrupted: {0}")]
    Corruption(String),

    #[error("Recovery failed: {0}")]
    Recovery(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),
}

impl Error {
    /// Check if this error means the key simply does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Check if this error indicates on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}
