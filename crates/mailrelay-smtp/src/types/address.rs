//! Email address types.

use crate::error::{Error, Result};

/// Email address from an SMTP envelope path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Domain part of the address.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        if addr.chars().any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>') {
            return Err(Error::InvalidAddress(format!(
                "Address contains illegal characters: {addr}"
            )));
        }

        let Some((local, domain)) = addr.rsplit_once('@') else {
            return Err(Error::InvalidAddress("Address must contain @".into()));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(
                "Local and domain parts cannot be empty".into(),
            ));
        }

        if domain.contains('@') || (!local.starts_with('"') && local.contains('@')) {
            return Err(Error::InvalidAddress(
                "Address must have exactly one @".into(),
            ));
        }

        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert_eq!(addr.domain(), "example.com");
    }

    #[test]
    fn test_quoted_local_part() {
        let addr = Address::new("\"john@home\"@example.com").unwrap();
        assert_eq!(addr.domain(), "example.com");
    }

    #[test]
    fn test_invalid_address_no_at() {
        assert!(Address::new("userexample.com").is_err());
    }

    #[test]
    fn test_invalid_address_empty() {
        assert!(Address::new("").is_err());
    }

    #[test]
    fn test_invalid_address_empty_local() {
        assert!(Address::new("@example.com").is_err());
    }

    #[test]
    fn test_invalid_address_empty_domain() {
        assert!(Address::new("user@").is_err());
    }

    #[test]
    fn test_invalid_address_two_ats() {
        assert!(Address::new("a@b@example.com").is_err());
    }

    #[test]
    fn test_invalid_address_whitespace() {
        assert!(Address::new("user @example.com").is_err());
        assert!(Address::new("<user@example.com>").is_err());
    }
}
