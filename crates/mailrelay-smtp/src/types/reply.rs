//! Replies sent by the listener.

use std::fmt;

/// A reply to one client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code.
    pub code: ReplyCode,
    /// Text lines; more than one makes a multi-line reply.
    pub lines: Vec<String>,
}

impl Reply {
    /// Creates a reply from any number of text lines.
    pub fn new<I, S>(code: ReplyCode, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code,
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a single-line reply.
    pub fn line(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// Wire form, CRLF terminated.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

/// `250-first` / `250 last`: every line but the last carries a hyphen.
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some((last, init)) = self.lines.split_last() else {
            return write!(f, "{}\r\n", self.code);
        };
        for line in init {
            write!(f, "{}-{line}\r\n", self.code)?;
        }
        write!(f, "{} {last}\r\n", self.code)
    }
}

/// Three-digit SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 250 Requested action completed
    pub const OK: Self = Self(250);
    /// 252 Cannot verify user, will attempt delivery
    pub const CANNOT_VERIFY: Self = Self(252);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 451 Local error in processing
    pub const LOCAL_ERROR: Self = Self(451);
    /// 500 Command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 501 Syntax error in parameters
    pub const PARAMETER_ERROR: Self = Self(501);
    /// 502 Command not implemented
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 503 Bad sequence of commands
    pub const BAD_SEQUENCE: Self = Self(503);
    /// 552 Exceeded storage allocation
    pub const EXCEEDED_STORAGE: Self = Self(552);

    /// Numeric value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Positive completion (2xx).
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 / 100 == 2
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let reply = Reply::line(ReplyCode::OK, "OK: queued");
        assert_eq!(reply.to_bytes(), b"250 OK: queued\r\n");
    }

    #[test]
    fn test_multi_line() {
        let reply = Reply::new(ReplyCode::OK, ["relay.local", "8BITMIME", "PIPELINING"]);
        assert_eq!(
            reply.to_string(),
            "250-relay.local\r\n250-8BITMIME\r\n250 PIPELINING\r\n"
        );
    }

    #[test]
    fn test_no_text() {
        let reply = Reply::new(ReplyCode::CLOSING, Vec::<String>::new());
        assert_eq!(reply.to_bytes(), b"221\r\n");
    }

    #[test]
    fn test_code_classes() {
        assert!(ReplyCode::OK.is_positive());
        assert!(ReplyCode::CANNOT_VERIFY.is_positive());
        assert!(!ReplyCode::START_DATA.is_positive());
        assert!(!ReplyCode::LOCAL_ERROR.is_positive());
        assert_eq!(ReplyCode::EXCEEDED_STORAGE.value(), 552);
    }
}
