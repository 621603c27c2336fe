//! Error types for the relay.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors that can occur in relay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is unusable; every problem found is listed.
    #[error("Configuration error: {}", join(.0))]
    Config(Vec<ConfigError>),

    /// Token endpoint or credential store failure.
    #[error("OAuth error: {0}")]
    OAuth(#[from] mailrelay_oauth::Error),

    /// Listener failure.
    #[error("SMTP error: {0}")]
    Smtp(#[from] mailrelay_smtp::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Graph API rejected the request.
    #[error("Graph API error {status}: {message}")]
    Graph {
        /// HTTP status code.
        status: u16,
        /// Response body or error message.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A send was attempted without a usable access token.
    #[error("No usable access token")]
    NoUsableToken,

    /// Message content could not be interpreted.
    #[error("Message error: {0}")]
    Message(String),
}

fn join(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
