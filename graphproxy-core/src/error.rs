use thiserror::Error;

/// Unified error type for graphproxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Application not found: {0}")]
    AppNotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed update: {0}")]
    MalformedUpdate(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::AppNotFound(_) => 404,
            ProxyError::MissingSignature => 403,
            ProxyError::InvalidSignature => 400,
            ProxyError::MalformedUpdate(_) => 400,
            _ => 500,
        }
    }
}
