//! `OAuth2` provider endpoint configurations.

use crate::error::{Error, Result};
use url::Url;

/// Scope requested by default: send mail through Microsoft Graph and keep a
/// refresh token.
pub const MAIL_SEND_SCOPE: &str = "https://graph.microsoft.com/Mail.Send offline_access";

/// Microsoft identity platform device authorization endpoint (`common` tenant).
pub const MICROSOFT_DEVICE_AUTH_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/devicecode";

/// Microsoft identity platform token endpoint (`common` tenant).
pub const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// `OAuth2` provider configuration.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Provider name (e.g., "Microsoft").
    pub name: String,
    /// Device authorization endpoint.
    pub device_auth_url: Url,
    /// Token endpoint URL.
    pub token_url: Url,
}

impl Provider {
    /// Creates a new provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if URLs are invalid.
    pub fn new(
        name: impl Into<String>,
        device_auth_url: impl AsRef<str>,
        token_url: impl AsRef<str>,
    ) -> Result<Self> {
        let provider = Self {
            name: name.into(),
            device_auth_url: Url::parse(device_auth_url.as_ref())?,
            token_url: Url::parse(token_url.as_ref())?,
        };
        provider.validate()?;
        Ok(provider)
    }

    /// Validates that both endpoints are HTTP(S) URLs.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        for (label, url) in [
            ("device_auth_url", &self.device_auth_url),
            ("token_url", &self.token_url),
        ] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::InvalidConfig(format!(
                    "{label} must be an http(s) URL, got {url}"
                )));
            }
        }
        Ok(())
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
    fn test_microsoft_endpoints() {
        let provider =
            Provider::new("Microsoft", MICROSOFT_DEVICE_AUTH_URL, MICROSOFT_TOKEN_URL).unwrap();
        assert_eq!(provider.name, "Microsoft");
        assert_eq!(provider.device_auth_url.as_str(), MICROSOFT_DEVICE_AUTH_URL);
        assert_eq!(provider.token_url.as_str(), MICROSOFT_TOKEN_URL);
    }

    #[test]
    fn test_custom_provider() {
        let provider = Provider::new(
            "Custom",
            "https://auth.example.com/device",
            "https://auth.example.com/token",
        )
        .unwrap();

        assert_eq!(provider.name, "Custom");
        provider.validate().unwrap();
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(
            Provider::new("Bad", "not a url", "https://auth.example.com/token"),
            Err(Error::UrlError(_))
        ));
        assert!(matches!(
            Provider::new("Bad", "ftp://auth.example.com/device", "https://a.example/token"),
            Err(Error::InvalidConfig(_))
        ));
    }
}
