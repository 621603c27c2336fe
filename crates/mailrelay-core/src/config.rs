//! Relay configuration.
//!
//! Settings come from the process environment, optionally seeded from a
//! `.env` file in the working directory. Values that fail to parse are
//! reported by [`RelayConfig::validation_errors`] together with any other
//! problem, so the operator sees everything at once.

use crate::error::{Error, Result};
use mailrelay_oauth::provider::{MAIL_SEND_SCOPE, MICROSOFT_DEVICE_AUTH_URL, MICROSOFT_TOKEN_URL};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default listener address.
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Default listener port.
pub const DEFAULT_PORT: u16 = 1587;
/// Default device authorization endpoint.
pub const DEFAULT_AUTHORIZE_URL: &str = MICROSOFT_DEVICE_AUTH_URL;
/// Default token endpoint.
pub const DEFAULT_TOKEN_URL: &str = MICROSOFT_TOKEN_URL;
/// Default Graph `sendMail` endpoint.
pub const DEFAULT_SEND_MAIL_URL: &str = "https://graph.microsoft.com/v1.0/me/sendMail";
/// Default credential file.
pub const DEFAULT_CREDENTIALS_FILE: &str = "data/credentials.json";
/// Default limit on one HTTP exchange, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// Upper bound on establishing an HTTP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    Missing(&'static str),
    /// A variable could not be parsed.
    Invalid {
        /// Variable name.
        variable: &'static str,
        /// Offending value.
        value: String,
        /// What was expected.
        expected: &'static str,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(variable) => {
                write!(f, "The environment variable {variable} is required")
            }
            Self::Invalid {
                variable,
                value,
                expected,
            } => write!(
                f,
                "The environment variable {variable} must be {expected}, got '{value}'"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Runtime settings for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listener bind address (`SMTP_SERVER_BIND`).
    pub bind: String,
    /// Listener port (`SMTP_SERVER_PORT`).
    pub port: u16,
    /// `OAuth2` client id (`OAUTH2_CLIENT_ID`).
    pub client_id: String,
    /// Device authorization endpoint (`OAUTH2_AUTHORIZE_URL`).
    pub authorize_url: String,
    /// Token endpoint (`OAUTH2_TOKEN_URL`).
    pub token_url: String,
    /// Scope requested for device grants (`OAUTH2_SCOPE`).
    pub scope: String,
    /// Graph endpoint messages are posted to (`GRAPH_SEND_MAIL_URL`).
    pub send_mail_url: String,
    /// Credential file (`CREDENTIALS_FILE`).
    pub credentials_file: PathBuf,
    /// Largest message accepted by the listener (`SMTP_MAX_MESSAGE_SIZE`).
    pub max_message_size: usize,
    /// Limit on one request to the provider or Graph (`HTTP_TIMEOUT`, seconds).
    pub http_timeout: Duration,
    parse_errors: Vec<ConfigError>,
}

impl RelayConfig {
    /// Loads `.env` if present, then reads the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => debug!("Ignoring .env file: {e}"),
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut parse_errors = Vec::new();

        let port = match get("SMTP_SERVER_PORT") {
            None => DEFAULT_PORT,
            Some(value) => value.parse().unwrap_or_else(|_| {
                parse_errors.push(ConfigError::Invalid {
                    variable: "SMTP_SERVER_PORT",
                    value,
                    expected: "a port number",
                });
                DEFAULT_PORT
            }),
        };

        let max_message_size = match get("SMTP_MAX_MESSAGE_SIZE") {
            None => mailrelay_smtp::DEFAULT_MAX_MESSAGE_SIZE,
            Some(value) => value.parse().unwrap_or_else(|_| {
                parse_errors.push(ConfigError::Invalid {
                    variable: "SMTP_MAX_MESSAGE_SIZE",
                    value,
                    expected: "a size in bytes",
                });
                mailrelay_smtp::DEFAULT_MAX_MESSAGE_SIZE
            }),
        };

        let http_timeout = match get("HTTP_TIMEOUT") {
            None => DEFAULT_HTTP_TIMEOUT_SECS,
            Some(value) => value.parse().unwrap_or_else(|_| {
                parse_errors.push(ConfigError::Invalid {
                    variable: "HTTP_TIMEOUT",
                    value,
                    expected: "a number of seconds",
                });
                DEFAULT_HTTP_TIMEOUT_SECS
            }),
        };

        Self {
            bind: get("SMTP_SERVER_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            port,
            client_id: get("OAUTH2_CLIENT_ID").unwrap_or_default(),
            authorize_url: get("OAUTH2_AUTHORIZE_URL")
                .unwrap_or_else(|| DEFAULT_AUTHORIZE_URL.to_string()),
            token_url: get("OAUTH2_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
            scope: get("OAUTH2_SCOPE").unwrap_or_else(|| MAIL_SEND_SCOPE.to_string()),
            send_mail_url: get("GRAPH_SEND_MAIL_URL")
                .unwrap_or_else(|| DEFAULT_SEND_MAIL_URL.to_string()),
            credentials_file: get("CREDENTIALS_FILE")
                .map_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_FILE), PathBuf::from),
            max_message_size,
            http_timeout: Duration::from_secs(http_timeout),
            parse_errors,
        }
    }

    /// Every problem with this configuration, in variable order.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.client_id.is_empty() {
            errors.push(ConfigError::Missing("OAUTH2_CLIENT_ID"));
        }

        for (variable, value) in [
            ("OAUTH2_AUTHORIZE_URL", &self.authorize_url),
            ("OAUTH2_TOKEN_URL", &self.token_url),
            ("GRAPH_SEND_MAIL_URL", &self.send_mail_url),
        ] {
            let valid = Url::parse(value).is_ok_and(|url| matches!(url.scheme(), "http" | "https"));
            if !valid {
                errors.push(ConfigError::Invalid {
                    variable,
                    value: value.clone(),
                    expected: "an http(s) URL",
                });
            }
        }

        if self.max_message_size == 0 {
            errors.push(ConfigError::Invalid {
                variable: "SMTP_MAX_MESSAGE_SIZE",
                value: "0".to_string(),
                expected: "a size in bytes",
            });
        }

        if self.http_timeout.is_zero() {
            errors.push(ConfigError::Invalid {
                variable: "HTTP_TIMEOUT",
                value: "0".to_string(),
                expected: "a number of seconds",
            });
        }

        errors.extend(self.parse_errors.iter().cloned());
        errors
    }

    /// Returns the configuration if it has no problems.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] listing every problem found.
    pub fn validate(self) -> Result<Self> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(Error::Config(errors))
        }
    }

    /// HTTP client shared by the token endpoint and the Graph sender.
    ///
    /// Every request is bounded by [`RelayConfig::http_timeout`], so a stalled
    /// endpoint surfaces as [`Error::Http`] instead of blocking the relay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the TLS backend cannot be initialized.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.http_timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(self.http_timeout))
            .build()?)
    }

    /// Socket address string for the listener.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        if self.bind.contains(':') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
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
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> RelayConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RelayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("OAUTH2_CLIENT_ID", "client")]);

        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.port, 1587);
        assert_eq!(config.authorize_url, DEFAULT_AUTHORIZE_URL);
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.scope, MAIL_SEND_SCOPE);
        assert_eq!(config.send_mail_url, DEFAULT_SEND_MAIL_URL);
        assert_eq!(config.credentials_file, PathBuf::from("data/credentials.json"));
        assert_eq!(config.max_message_size, 26_214_400);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.listen_addr(), "127.0.0.1:1587");
        assert!(config.validation_errors().is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("OAUTH2_CLIENT_ID", "client"),
            ("SMTP_SERVER_BIND", "::1"),
            ("SMTP_SERVER_PORT", "2525"),
            ("OAUTH2_TOKEN_URL", "https://login.example.com/token"),
            ("CREDENTIALS_FILE", "/var/lib/relay/creds.json"),
            ("SMTP_MAX_MESSAGE_SIZE", "1024"),
            ("HTTP_TIMEOUT", "5"),
        ]);

        assert_eq!(config.port, 2525);
        assert_eq!(config.listen_addr(), "[::1]:2525");
        assert_eq!(config.token_url, "https://login.example.com/token");
        assert_eq!(
            config.credentials_file,
            PathBuf::from("/var/lib/relay/creds.json")
        );
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_http_timeout_rejected() {
        let config = config(&[("OAUTH2_CLIENT_ID", "client"), ("HTTP_TIMEOUT", "0")]);
        let errors = config.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("HTTP_TIMEOUT"));
    }

    #[test]
    fn test_missing_client_id() {
        let config = config(&[("OAUTH2_CLIENT_ID", "   ")]);
        assert_eq!(
            config.validation_errors(),
            vec![ConfigError::Missing("OAUTH2_CLIENT_ID")]
        );
        assert_eq!(
            ConfigError::Missing("OAUTH2_CLIENT_ID").to_string(),
            "The environment variable OAUTH2_CLIENT_ID is required"
        );
    }

    #[test]
    fn test_all_errors_reported() {
        let config = config(&[
            ("SMTP_SERVER_PORT", "99999"),
            ("OAUTH2_TOKEN_URL", "not a url"),
            ("SMTP_MAX_MESSAGE_SIZE", "lots"),
        ]);

        let errors = config.validation_errors();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ConfigError::Missing("OAUTH2_CLIENT_ID")));
        assert!(errors.iter().any(|e| e.to_string().contains("SMTP_SERVER_PORT")));
        assert!(errors.iter().any(|e| e.to_string().contains("OAUTH2_TOKEN_URL")));
        assert!(errors.iter().any(|e| e.to_string().contains("SMTP_MAX_MESSAGE_SIZE")));

        assert!(matches!(config.validate(), Err(Error::Config(e)) if e.len() == 4));
    }

    #[test]
    fn test_non_http_url_rejected() {
        let config = config(&[
            ("OAUTH2_CLIENT_ID", "client"),
            ("GRAPH_SEND_MAIL_URL", "ftp://graph.example.com/sendMail"),
        ]);
        assert_eq!(config.validation_errors().len(), 1);
    }
}
