//! Error types for pianola-core

use thiserror::Error;

/// Result type alias for pianola-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pianola-core
#[derive(Debug, Error)]
pub enum Error {
    /// The audio subsystem refused to start
    #[error("Audio handshake failed: {0}")]
    Handshake(String),

    /// A musical-time expression could not be parsed
    #[error("Invalid musical time: {0}")]
    InvalidTime(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
