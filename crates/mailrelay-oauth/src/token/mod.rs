//! `OAuth2` token types and management.

mod de;
mod set;

pub(crate) use de::optional_seconds;
pub use set::CredentialSet;

use crate::error::Error;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifetime assumed when the provider omits `expires_in` / `ext_expires_in`.
pub const DEFAULT_LIFETIME_SECS: i64 = 300;

/// Token scheme assumed when the provider omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Returns `now + secs`, saturating at the representable bounds.
pub(crate) fn expiry_after(now: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    let delta = TimeDelta::try_seconds(secs).unwrap_or(if secs < 0 {
        TimeDelta::MIN
    } else {
        TimeDelta::MAX
    });
    now.checked_add_signed(delta).unwrap_or(if secs < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Masks a secret for display: keeps a few leading and trailing characters.
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Read-only view of an access token usable against the mail API.
///
/// Only ever built from a [`CredentialPair`] whose primary expiry is still
/// in the future, see [`CredentialPair::access_token`].
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Access token string.
    pub access_token: String,
    /// Token scheme (usually "Bearer").
    pub token_type: String,
    /// Scope granted by authorization server.
    pub scope: Option<String>,
    /// Instant after which the token must not be used.
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Returns true if the token can still be used at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Remaining lifetime at `now` (negative once expired).
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        self.expires_at - now
    }

    /// Value for the HTTP `Authorization` header.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &mask(&self.access_token))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [not_after={}, scope={}]",
            self.token_type,
            mask(&self.access_token),
            self.expires_at.to_rfc3339(),
            self.scope.as_deref().unwrap_or("-")
        )
    }
}

/// Access token coupled with its refresh token; the persisted unit.
///
/// Pairs are never mutated once built. A refresh produces a new pair that
/// supersedes the old one in the [`CredentialSet`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    /// Access token string.
    pub access_token: String,
    /// Refresh token, absent for tokens that cannot be refreshed.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token scheme.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Scope granted by authorization server.
    #[serde(default)]
    pub scope: Option<String>,
    /// Primary expiry: the access token is usable until this instant.
    #[serde(deserialize_with = "de::timestamp")]
    pub not_after: DateTime<Utc>,
    /// Extended expiry: the refresh token is usable until this instant.
    #[serde(deserialize_with = "de::timestamp")]
    pub ext_not_after: DateTime<Utc>,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl CredentialPair {
    /// Builds a pair from a token endpoint response received at `now`.
    ///
    /// The extended expiry is clamped so it never precedes the primary one.
    #[must_use]
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let not_after = expiry_after(now, response.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS));
        let ext_not_after = expiry_after(
            now,
            response.ext_expires_in.unwrap_or(DEFAULT_LIFETIME_SECS),
        )
        .max(not_after);

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(default_token_type),
            scope: response.scope,
            not_after,
            ext_not_after,
        }
    }

    /// Keeps `fallback` as refresh token when the provider did not issue a new one.
    #[must_use]
    pub fn or_refresh_token(mut self, fallback: Option<String>) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = fallback;
        }
        self
    }

    /// Usable for direct access: the primary expiry has not passed.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now < self.not_after
    }

    /// Not yet dead: the extended expiry has not passed.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.ext_not_after
    }

    /// Can mint a new access token through a refresh exchange.
    #[must_use]
    pub fn is_refreshable(&self, now: DateTime<Utc>) -> bool {
        self.is_live(now) && self.refresh_token.is_some()
    }

    /// Returns the refresh token if available.
    ///
    /// # Errors
    ///
    /// Returns an error if no refresh token is available.
    pub fn refresh_token(&self) -> Result<&str, Error> {
        self.refresh_token.as_deref().ok_or(Error::NoRefreshToken)
    }

    /// Access token view, only while the pair is usable at `now`.
    #[must_use]
    pub fn access_token(&self, now: DateTime<Utc>) -> Option<AccessToken> {
        self.is_usable(now).then(|| AccessToken {
            access_token: self.access_token.clone(),
            token_type: self.token_type.clone(),
            scope: self.scope.clone(),
            expires_at: self.not_after,
        })
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("not_after", &self.not_after)
            .field("ext_not_after", &self.ext_not_after)
            .finish()
    }
}

/// Token response from `OAuth2` server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Primary lifetime in seconds.
    #[serde(
        default,
        deserialize_with = "optional_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_in: Option<i64>,
    /// Extended lifetime in seconds.
    #[serde(
        default,
        deserialize_with = "optional_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub ext_expires_in: Option<i64>,
    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Error response from `OAuth2` server.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an Error.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::oauth_error(self.error, self.error_description)
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
    use chrono::Duration;
    use proptest::prelude::*;

    fn response(expires_in: Option<i64>, ext_expires_in: Option<i64>) -> TokenResponse {
        TokenResponse {
            access_token: "access-token-value".to_string(),
            token_type: None,
            expires_in,
            ext_expires_in,
            refresh_token: Some("refresh-token-value".to_string()),
            scope: Some("Mail.Send".to_string()),
        }
    }

    #[test]
    fn test_pair_from_response() {
        let now = Utc::now();
        let pair = CredentialPair::from_response(response(Some(3600), Some(7200)), now);

        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.not_after, now + Duration::seconds(3600));
        assert_eq!(pair.ext_not_after, now + Duration::seconds(7200));
        assert_eq!(pair.refresh_token.as_deref(), Some("refresh-token-value"));
    }

    #[test]
    fn test_pair_defaults_lifetimes() {
        let now = Utc::now();
        let pair = CredentialPair::from_response(response(None, None), now);

        assert_eq!(pair.not_after, now + Duration::seconds(DEFAULT_LIFETIME_SECS));
        assert_eq!(pair.ext_not_after, pair.not_after);
    }

    #[test]
    fn test_extended_expiry_clamped_to_primary() {
        let now = Utc::now();
        let pair = CredentialPair::from_response(response(Some(3600), None), now);

        assert_eq!(pair.ext_not_after, pair.not_after);
    }

    #[test]
    fn test_pair_validity_states() {
        let now = Utc::now();
        let pair = CredentialPair::from_response(response(Some(60), Some(600)), now);

        assert!(pair.is_usable(now));
        assert!(pair.access_token(now).is_some());

        let later = now + Duration::seconds(120);
        assert!(!pair.is_usable(later));
        assert!(pair.is_refreshable(later));
        assert!(pair.access_token(later).is_none());

        let dead = now + Duration::seconds(600);
        assert!(!pair.is_live(dead));
        assert!(!pair.is_refreshable(dead));
    }

    #[test]
    fn test_pair_without_refresh_token_is_not_refreshable() {
        let now = Utc::now();
        let mut raw = response(Some(0), Some(600));
        raw.refresh_token = None;
        let pair = CredentialPair::from_response(raw, now);

        assert!(pair.is_live(now));
        assert!(!pair.is_refreshable(now));
        assert!(matches!(pair.refresh_token(), Err(Error::NoRefreshToken)));
    }

    #[test]
    fn test_or_refresh_token_keeps_new_value() {
        let now = Utc::now();
        let pair = CredentialPair::from_response(response(Some(60), None), now)
            .or_refresh_token(Some("old".to_string()));
        assert_eq!(pair.refresh_token.as_deref(), Some("refresh-token-value"));

        let mut raw = response(Some(60), None);
        raw.refresh_token = None;
        let pair = CredentialPair::from_response(raw, now).or_refresh_token(Some("old".into()));
        assert_eq!(pair.refresh_token.as_deref(), Some("old"));
    }

    #[test]
    fn test_access_token_view() {
        let now = Utc::now();
        let pair = CredentialPair::from_response(response(Some(100), None), now);
        let token = pair.access_token(now).unwrap();

        assert_eq!(token.expires_at, pair.not_after);
        assert_eq!(token.remaining(now), Duration::seconds(100));
        assert_eq!(token.authorization_header(), "Bearer access-token-value");
        assert!(token.is_valid_at(now));
        assert!(!token.is_valid_at(pair.not_after));
    }

    #[test]
    fn test_display_masks_token() {
        let now = Utc::now();
        let pair = CredentialPair::from_response(response(Some(100), None), now);
        let token = pair.access_token(now).unwrap();

        let shown = token.to_string();
        assert!(shown.starts_with("Bearer acc...alue"));
        assert!(!shown.contains("access-token-value"));
        assert!(!format!("{pair:?}").contains("refresh-token-value"));
    }

    #[test]
    fn test_token_response_accepts_string_seconds() {
        let json = r#"{
            "access_token": "abc",
            "token_type": "Bearer",
            "expires_in": "3599",
            "ext_expires_in": 3599
        }"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.expires_in, Some(3599));
        assert_eq!(response.ext_expires_in, Some(3599));
        assert!(response.refresh_token.is_none());
    }

    #[test]
    fn test_pair_serialization_format() {
        let now = Utc::now();
        let pair = CredentialPair::from_response(response(Some(100), Some(200)), now);
        let value = serde_json::to_value(&pair).unwrap();

        for key in [
            "access_token",
            "refresh_token",
            "token_type",
            "scope",
            "not_after",
            "ext_not_after",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }

        let restored: CredentialPair = serde_json::from_value(value).unwrap();
        assert_eq!(restored, pair);
    }

    proptest! {
        #[test]
        fn prop_extended_never_precedes_primary(
            expires_in in proptest::option::of(-10_000i64..10_000_000),
            ext_expires_in in proptest::option::of(-10_000i64..10_000_000),
        ) {
            let now = Utc::now();
            let pair = CredentialPair::from_response(response(expires_in, ext_expires_in), now);
            prop_assert!(pair.ext_not_after >= pair.not_after);
        }
    }
}
