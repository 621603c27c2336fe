//! Stalled endpoints fail instead of blocking the relay.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration as TimeDelta, Utc};
use mailrelay_core::{Envelope, Error, GraphMailSender, MailSender, RelayConfig};
use mailrelay_oauth::{AccessToken, OAuthClient, Provider, TokenEndpoint};
use mailrelay_smtp::Address;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_with_timeout(secs: &str) -> RelayConfig {
    let secs = secs.to_string();
    RelayConfig::from_lookup(move |name| match name {
        "OAUTH2_CLIENT_ID" => Some("relay-test".to_string()),
        "HTTP_TIMEOUT" => Some(secs.clone()),
        _ => None,
    })
}

async fn stalled_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "late", "expires_in": 3600 }))
                .set_delay(Duration::from_secs(3600)),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_stalled_token_endpoint_times_out() {
    let server = stalled_server().await;
    let config = config_with_timeout("1");
    let provider = Provider::new(
        "Mock",
        format!("{}/devicecode", server.uri()),
        format!("{}/token", server.uri()),
    )
    .unwrap();
    let client = OAuthClient::new("relay-test", provider)
        .unwrap()
        .with_http_client(config.http_client().unwrap());

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        client.exchange_refresh_token("refresh-1"),
    )
    .await
    .expect("request was not bounded by the configured timeout");

    assert!(matches!(result, Err(mailrelay_oauth::Error::Http(_))));
}

#[tokio::test]
async fn test_stalled_graph_endpoint_times_out() {
    let server = stalled_server().await;
    let config = config_with_timeout("1");
    let sender = GraphMailSender::new(&format!("{}/v1.0/me/sendMail", server.uri()))
        .unwrap()
        .with_http_client(config.http_client().unwrap());

    let envelope = Envelope {
        mail_from: Some(Address::new("app@example.com").unwrap()),
        rcpt_to: vec![Address::new("bob@example.com").unwrap()],
        data: b"Subject: Hi\r\n\r\nHello\r\n".to_vec(),
        received_at: Utc::now(),
    };
    let token = AccessToken {
        access_token: "graph-token".to_string(),
        token_type: "Bearer".to_string(),
        scope: None,
        expires_at: Utc::now() + TimeDelta::hours(1),
    };

    let result = tokio::time::timeout(Duration::from_secs(10), sender.send(&envelope, &token))
        .await
        .expect("request was not bounded by the configured timeout");

    assert!(matches!(result, Err(Error::Http(_))));
}
