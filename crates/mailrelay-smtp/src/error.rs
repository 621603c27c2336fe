//! Error types for SMTP operations.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (malformed command or premature end of input).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message too large.
    #[error("Message exceeds size limit: {0} bytes")]
    MessageTooLarge(usize),

    /// Command not valid in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::MessageTooLarge(1024).to_string(),
            "Message exceeds size limit: 1024 bytes"
        );
        assert_eq!(
            Error::InvalidState("need MAIL command".into()).to_string(),
            "Invalid state: need MAIL command"
        );
    }
}
