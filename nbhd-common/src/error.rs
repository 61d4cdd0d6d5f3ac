//! Common error types for the neighbourhood client resilience layer

use thiserror::Error;

/// Common result type for resilience-layer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the resilience crates
#[derive(Error, Debug)]
pub enum Error {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML configuration could not be parsed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration value out of range
    #[error("Configuration error: {0}")]
    Config(String),
}
