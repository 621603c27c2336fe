//! Error types for `OAuth2` operations.

use std::io;

/// Result type alias for `OAuth2` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `OAuth2` error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (credential file access).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `OAuth2` error from server.
    #[error("OAuth2 error: {error} - {description}")]
    OAuth {
        /// Error code (e.g., `invalid_grant`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// No refresh token available.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Invalid token response.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Creates an OAuth error from error code and description.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns true if the provider reported `authorization_pending`.
    #[must_use]
    pub fn is_authorization_pending(&self) -> bool {
        matches!(self, Self::OAuth { error, .. } if error == "authorization_pending")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_pending() {
        assert!(Error::oauth_error("authorization_pending", "").is_authorization_pending());
        assert!(!Error::oauth_error("invalid_grant", "").is_authorization_pending());
        assert!(!Error::NoRefreshToken.is_authorization_pending());
    }

    #[test]
    fn test_oauth_error_display() {
        let error = Error::oauth_error("invalid_grant", "Refresh token expired");
        assert_eq!(
            error.to_string(),
            "OAuth2 error: invalid_grant - Refresh token expired"
        );
    }
}
