//! Error types for the Shipyard daemon

use thiserror::Error;

/// Main error type for the Shipyard daemon
#[derive(Error, Debug)]
pub enum ShipyardError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// The composition document could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// One or more security rule violations, all of them collected
    #[error("Validation failed: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    #[error("Port exhaustion: no block of {0} contiguous free ports")]
    PortExhausted(usize),

    /// A Git or container-runtime operation failed
    #[error("Upstream operation failed: {0}")]
    UpstreamError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    /// A request carried unusable input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ShipyardError {
    fn from(err: anyhow::Error) -> Self {
        ShipyardError::Internal(err.to_string())
    }
}
