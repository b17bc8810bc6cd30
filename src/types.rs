//! Process-level error type for Keyward
//!
//! Request-level failures never surface here: they are converted to wire
//! errors by the service layer (see `service::ActionError`). This type covers
//! startup, configuration, persistence and transport failures.

use thiserror::Error;

/// Process-level errors
#[derive(Error, Debug)]
pub enum KeywardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for KeywardError {
    fn from(e: serde_json::Error) -> Self {
        KeywardError::Storage(format!("JSON error: {e}"))
    }
}

impl From<hyper_tungstenite::tungstenite::Error> for KeywardError {
    fn from(e: hyper_tungstenite::tungstenite::Error) -> Self {
        KeywardError::WebSocket(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KeywardError>;
