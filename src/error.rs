use thiserror::Error;

/// Unified error type for the helper
#[derive(Error, Debug)]
pub enum HelperError {
    // Subscription and probe transport
    #[error("Network error: {0}")]
    Network(String),

    // Payload errors
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // Engine process errors
    #[error("Engine start failed: {0}")]
    StartFailure(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for helper operations
pub type Result<T> = std::result::Result<T, HelperError>;

impl HelperError {
    /// Payload errors abort a whole subscribe cycle
    pub fn is_payload_error(&self) -> bool {
        matches!(self, HelperError::Parse(_) | HelperError::Decode(_))
    }
}

impl From<reqwest::Error> for HelperError {
    fn from(err: reqwest::Error) -> Self {
        HelperError::Network(err.to_string())
    }
}

impl From<serde_yaml::Error> for HelperError {
    fn from(err: serde_yaml::Error) -> Self {
        HelperError::Config(err.to_string())
    }
}
