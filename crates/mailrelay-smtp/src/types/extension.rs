//! SMTP service extensions advertised in the EHLO reply.

use std::fmt;

/// Extension keyword with its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    /// SIZE - Maximum message size
    Size(usize),
    /// 8BITMIME - 8-bit MIME transport
    EightBitMime,
    /// PIPELINING - Command pipelining
    Pipelining,
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size(size) => write!(f, "SIZE {size}"),
            Self::EightBitMime => f.write_str("8BITMIME"),
            Self::Pipelining => f.write_str("PIPELINING"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(Extension::Size(1024).to_string(), "SIZE 1024");
        assert_eq!(Extension::EightBitMime.to_string(), "8BITMIME");
        assert_eq!(Extension::Pipelining.to_string(), "PIPELINING");
    }
}
