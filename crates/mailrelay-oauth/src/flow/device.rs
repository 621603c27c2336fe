//! Device Authorization Grant types (RFC 8628).

use crate::token::{expiry_after, optional_seconds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Device grant lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_GRANT_LIFETIME_SECS: i64 = 300;

/// Poll interval used when the provider omits `interval` or sends zero.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Device authorization response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceAuthorization {
    /// Device code for polling.
    pub device_code: String,
    /// User code to display to the user.
    pub user_code: String,
    /// Verification URI where user should go.
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    /// Expiration time in seconds.
    #[serde(
        default,
        deserialize_with = "optional_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_in: Option<i64>,
    /// Polling interval in seconds.
    #[serde(
        default,
        deserialize_with = "optional_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<i64>,
    /// Provider supplied instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// An in-flight interactive authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGrant {
    /// Device code for polling.
    pub device_code: String,
    /// User code to display to the user.
    pub user_code: String,
    /// Verification URI where user should go.
    pub verification_uri: String,
    /// Delay between two token polls.
    pub poll_interval: Duration,
    /// Instant after which polling stops.
    pub expires_at: DateTime<Utc>,
}

impl DeviceGrant {
    /// Builds a grant from the provider response received at `now`.
    #[must_use]
    pub fn from_authorization(auth: DeviceAuthorization, now: DateTime<Utc>) -> Self {
        let poll_interval = auth
            .interval
            .filter(|secs| *secs > 0)
            .and_then(|secs| u64::try_from(secs).ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        Self {
            device_code: auth.device_code,
            user_code: auth.user_code,
            verification_uri: auth.verification_uri,
            poll_interval: Duration::from_secs(poll_interval),
            expires_at: expiry_after(now, auth.expires_in.unwrap_or(DEFAULT_GRANT_LIFETIME_SECS)),
        }
    }

    /// Returns true while the user can still complete authorization.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration as TimeDelta;

    #[test]
    fn test_device_auth_deserialization() {
        let json = r#"{
            "device_code": "dev123",
            "user_code": "USER-CODE",
            "verification_uri": "https://example.com/device",
            "expires_in": 1800,
            "interval": 5,
            "message": "To sign in, use a web browser"
        }"#;

        let auth: DeviceAuthorization = serde_json::from_str(json).unwrap();
        assert_eq!(auth.device_code, "dev123");
        assert_eq!(auth.user_code, "USER-CODE");
        assert_eq!(auth.expires_in, Some(1800));
        assert_eq!(auth.interval, Some(5));
    }

    #[test]
    fn test_verification_url_alias() {
        let json = r#"{
            "device_code": "dev123",
            "user_code": "USER-CODE",
            "verification_url": "https://www.google.com/device"
        }"#;

        let auth: DeviceAuthorization = serde_json::from_str(json).unwrap();
        assert_eq!(auth.verification_uri, "https://www.google.com/device");
    }

    #[test]
    fn test_grant_defaults() {
        let now = Utc::now();
        let auth: DeviceAuthorization = serde_json::from_str(
            r#"{"device_code": "d", "user_code": "u", "verification_uri": "https://v"}"#,
        )
        .unwrap();

        let grant = DeviceGrant::from_authorization(auth, now);
        assert_eq!(grant.poll_interval, Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS));
        assert_eq!(
            grant.expires_at,
            now + TimeDelta::seconds(DEFAULT_GRANT_LIFETIME_SECS)
        );
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let now = Utc::now();
        for interval in ["0", "-3", "\"0\""] {
            let auth: DeviceAuthorization = serde_json::from_str(&format!(
                r#"{{"device_code": "d", "user_code": "u", "verification_uri": "https://v",
                    "expires_in": 900, "interval": {interval}}}"#
            ))
            .unwrap();

            let grant = DeviceGrant::from_authorization(auth, now);
            assert_eq!(
                grant.poll_interval,
                Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
                "interval {interval}"
            );
        }
    }

    #[test]
    fn test_grant_expiry() {
        let now = Utc::now();
        let auth: DeviceAuthorization = serde_json::from_str(
            r#"{"device_code": "d", "user_code": "u", "verification_uri": "https://v",
                "expires_in": "60", "interval": 2}"#,
        )
        .unwrap();

        let grant = DeviceGrant::from_authorization(auth, now);
        assert_eq!(grant.poll_interval, Duration::from_secs(2));
        assert!(grant.is_valid_at(now + TimeDelta::seconds(59)));
        assert!(!grant.is_valid_at(now + TimeDelta::seconds(60)));
    }
}
