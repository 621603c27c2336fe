//! Relay loop against a mock identity provider.

#![allow(clippy::unwrap_used)]

use chrono::{Duration as TimeDelta, Utc};
use mailrelay_core::{GraphMailSender, RelayLoop, mail_queue};
use mailrelay_oauth::{
    CredentialPair, CredentialStore, DeviceCodeHandler, OAuthClient, Provider, StoredCredentials,
    TokenHandler,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLIENT_ID: &str = "relay-test";

async fn mount_provider(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .expect(1..)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/devicecode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dev-1",
            "user_code": "WXYZ-1234",
            "verification_uri": "https://microsoft.com/devicelogin",
            "expires_in": 60,
            "interval": 1
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("device_code=dev-1"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "authorization_pending" })),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("device_code=dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access-token",
            "refresh_token": "rt-new",
            "token_type": "Bearer",
            "expires_in": 3600,
            "ext_expires_in": 7200
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn stored_tokens(store: &CredentialStore) -> Vec<String> {
    store
        .load()
        .ok()
        .flatten()
        .map(|stored| stored.tokens.into_iter().map(|t| t.access_token).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_rejected_refresh_falls_back_to_device_flow() {
    let server = MockServer::start().await;
    mount_provider(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials.json"));
    let now = Utc::now();
    store
        .save(&StoredCredentials {
            client_id: CLIENT_ID.to_string(),
            tokens: vec![CredentialPair {
                access_token: "stale-access-token".to_string(),
                refresh_token: Some("rt-old".to_string()),
                token_type: "Bearer".to_string(),
                scope: None,
                not_after: now + TimeDelta::seconds(2),
                ext_not_after: now + TimeDelta::hours(1),
            }],
        })
        .unwrap();

    let provider = Provider::new(
        "Mock",
        format!("{}/devicecode", server.uri()),
        format!("{}/token", server.uri()),
    )
    .unwrap();
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&prompts);
    let mut handler = DeviceCodeHandler::new(OAuthClient::new(CLIENT_ID, provider).unwrap())
        .unwrap()
        .with_prompt(move |grant| {
            seen.lock()
                .unwrap()
                .push((grant.user_code.clone(), grant.verification_uri.clone()));
        });
    handler.load_credentials(&store).await;

    let sender = GraphMailSender::new(&format!("{}/v1.0/me/sendMail", server.uri())).unwrap();
    let (queue, inbox) = mail_queue();
    let shutdown = CancellationToken::new();
    let mut relay = RelayLoop::new(handler, sender, store.clone(), inbox, shutdown.clone());

    let watcher = async {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        while !stored_tokens(&store).contains(&"fresh-access-token".to_string()) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "device flow never completed"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        shutdown.cancel();
    };

    let (result, ()) = tokio::join!(relay.run(), watcher);
    result.unwrap();
    drop(queue);

    assert_eq!(
        prompts.lock().unwrap().as_slice(),
        [(
            "WXYZ-1234".to_string(),
            "https://microsoft.com/devicelogin".to_string()
        )]
    );
    assert_eq!(stored_tokens(&store), vec!["fresh-access-token".to_string()]);
    assert_eq!(relay.handler().pending_grants(), 0);
}
