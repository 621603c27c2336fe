//! `OAuth2` token endpoint client.

mod device;

pub use device::{DeviceAuthorization, DeviceGrant};

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::token::{ErrorResponse, TokenResponse};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use url::Url;

/// Grant type sent when polling with a device code (RFC 8628).
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// The provider exchanges used by the token handler.
///
/// Every method performs exactly one request; retry policy belongs to the
/// caller.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Client identity sent with every request.
    fn client_id(&self) -> &str;

    /// Requests a device grant for `scope`.
    async fn request_device_authorization(&self, scope: &str) -> Result<DeviceAuthorization>;

    /// Polls the token endpoint once with a device code.
    ///
    /// A pending authorization comes back as an `authorization_pending`
    /// [`Error::OAuth`].
    async fn exchange_device_code(&self, device_code: &str) -> Result<TokenResponse>;

    /// Exchanges a refresh token for a new token response.
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse>;
}

/// Provider replies are told apart by body, not by status code.
#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointReply<T> {
    Success(T),
    Failure(ErrorResponse),
}

/// `OAuth2` client for a public (secret-less) application.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client ID from provider.
    pub client_id: String,
    /// Provider configuration.
    pub provider: Provider,
    /// HTTP client.
    http_client: Client,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the client id is empty.
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Result<Self> {
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(Error::InvalidConfig("client_id is required".into()));
        }

        Ok(Self {
            client_id,
            provider,
            http_client: Client::new(),
        })
    }

    /// Uses a preconfigured HTTP client (timeouts, proxies).
    #[must_use]
    pub fn with_http_client(mut self, http_client: Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// Posts a form and interprets the provider's JSON reply.
    async fn post_form<T: DeserializeOwned>(
        &self,
        url: &Url,
        params: &HashMap<&str, &str>,
    ) -> Result<T> {
        let response = self.http_client.post(url.clone()).form(params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<EndpointReply<T>>(&body) {
            Ok(EndpointReply::Success(reply)) => Ok(reply),
            Ok(EndpointReply::Failure(error)) => Err(error.into_error()),
            Err(_) => Err(Error::InvalidResponse(format!(
                "HTTP {status} from {url}: {}",
                body.chars().take(200).collect::<String>()
            ))),
        }
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn request_device_authorization(&self, scope: &str) -> Result<DeviceAuthorization> {
        let mut params = HashMap::new();
        params.insert("client_id", self.client_id.as_str());
        if !scope.is_empty() {
            params.insert("scope", scope);
        }

        self.post_form(&self.provider.device_auth_url, &params).await
    }

    async fn exchange_device_code(&self, device_code: &str) -> Result<TokenResponse> {
        let mut params = HashMap::new();
        params.insert("grant_type", DEVICE_CODE_GRANT_TYPE);
        params.insert("device_code", device_code);
        params.insert("client_id", &self.client_id);

        self.post_form(&self.provider.token_url, &params).await
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", &self.client_id);

        self.post_form(&self.provider.token_url, &params).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OAuthClient {
        let provider = Provider::new(
            "Test",
            format!("{}/devicecode", server.uri()),
            format!("{}/token", server.uri()),
        )
        .unwrap();
        OAuthClient::new("test-client", provider).unwrap()
    }

    #[test]
    fn test_oauth_client_requires_client_id() {
        let provider = Provider::new(
            "Microsoft",
            crate::provider::MICROSOFT_DEVICE_AUTH_URL,
            crate::provider::MICROSOFT_TOKEN_URL,
        )
        .unwrap();
        assert!(matches!(
            OAuthClient::new("  ", provider.clone()),
            Err(Error::InvalidConfig(_))
        ));

        let client = OAuthClient::new("test_client_id", provider).unwrap();
        assert_eq!(client.client_id(), "test_client_id");
    }

    #[tokio::test]
    async fn test_request_device_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/devicecode"))
            .and(body_string_contains("client_id=test-client"))
            .and(body_string_contains("scope=Mail.Send+offline_access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "dev-123",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://microsoft.com/devicelogin",
                "expires_in": 900,
                "interval": 5
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = client_for(&server)
            .request_device_authorization("Mail.Send offline_access")
            .await
            .unwrap();

        assert_eq!(auth.device_code, "dev-123");
        assert_eq!(auth.user_code, "ABCD-EFGH");
        assert_eq!(auth.interval, Some(5));
    }

    #[tokio::test]
    async fn test_exchange_device_code_pending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code",
            ))
            .and(body_string_contains("device_code=dev-123"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "authorization_pending",
                "error_description": "The user has not yet completed authorization"
            })))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .exchange_device_code("dev-123")
            .await
            .unwrap_err();

        assert!(error.is_authorization_pending());
    }

    #[tokio::test]
    async fn test_exchange_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .and(body_string_contains("client_id=test-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access-2",
                "token_type": "Bearer",
                "expires_in": 3599,
                "ext_expires_in": 3599,
                "refresh_token": "refresh-2"
            })))
            .mount(&server)
            .await;

        let response = client_for(&server)
            .exchange_refresh_token("refresh-1")
            .await
            .unwrap();

        assert_eq!(response.access_token, "access-2");
        assert_eq!(response.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(response.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn test_error_body_with_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;

        let error = client_for(&server)
            .exchange_refresh_token("refresh-1")
            .await
            .unwrap_err();

        assert!(matches!(error, Error::OAuth { ref error, .. } if error == "invalid_grant"));
    }

    #[tokio::test]
    async fn test_non_json_reply_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .exchange_refresh_token("refresh-1")
            .await
            .unwrap_err();

        assert!(matches!(error, Error::InvalidResponse(ref msg) if msg.contains("502")));
    }
}
