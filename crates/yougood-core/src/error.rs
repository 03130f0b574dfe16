//! Error types for the call engine

use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A `CallConfig` failed validation at arm or save time.
    #[error("Invalid call configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    #[error("Saved plan not found: {0}")]
    PlanNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persona file error: {0}")]
    PersonaFile(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// The reply gateway is not configured or answered with something unusable.
    #[error("Reply gateway error: {0}")]
    Gateway(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The call runtime has shut down.
    #[error("Call service is not running")]
    ServiceClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
