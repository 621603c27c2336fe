//! Token lifecycle management.
//!
//! A [`TokenHandler`] owns the credential pairs of one client and decides, on
//! every access request, whether a cached token can be used as is, must be
//! refreshed, or requires a new interactive grant.
//!
//! The handler never retries and never surfaces "no token" as an error:
//! every failed exchange is logged and collapses to `None`, leaving the
//! caller to fall back to the next, slower acquisition path.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::flow::{DeviceGrant, TokenEndpoint};
use crate::provider::MAIL_SEND_SCOPE;
use crate::store::{CredentialStore, StoredCredentials};
use crate::token::{AccessToken, CredentialPair, CredentialSet};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Callback showing a device grant to the operator.
pub type Prompt = Box<dyn Fn(&DeviceGrant) + Send + Sync>;

/// Source of access tokens for the relay.
#[async_trait]
pub trait TokenHandler: Send {
    /// Returns the best access token currently obtainable.
    ///
    /// With `silently` set, the call never prompts the operator and returns
    /// `None` when no cached or refreshable credential exists. Otherwise it
    /// falls back to an interactive grant and waits for its outcome.
    async fn get_access_token(&mut self, silently: bool) -> Option<AccessToken>;

    /// Replaces the in-memory credentials with those stored in `store`.
    async fn load_credentials(&mut self, store: &CredentialStore);

    /// Persists the credentials that are usable right now.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn save_credentials(&self, store: &CredentialStore) -> Result<()>;
}

/// Token handler backed by the `OAuth2` Device Authorization Grant.
pub struct DeviceCodeHandler<E, C = SystemClock> {
    endpoint: E,
    clock: C,
    scope: String,
    device_grants: HashMap<String, DeviceGrant>,
    credentials: CredentialSet,
    prompt: Prompt,
}

impl<E: TokenEndpoint> DeviceCodeHandler<E> {
    /// Creates a handler using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the endpoint has no client id.
    pub fn new(endpoint: E) -> Result<Self> {
        Self::with_clock(endpoint, SystemClock)
    }
}

impl<E: TokenEndpoint, C: Clock> DeviceCodeHandler<E, C> {
    /// Creates a handler reading the time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the endpoint has no client id.
    pub fn with_clock(endpoint: E, clock: C) -> Result<Self> {
        if endpoint.client_id().trim().is_empty() {
            return Err(Error::InvalidConfig("client_id is required".into()));
        }

        Ok(Self {
            endpoint,
            clock,
            scope: MAIL_SEND_SCOPE.to_string(),
            device_grants: HashMap::new(),
            credentials: CredentialSet::new(),
            prompt: Box::new(print_prompt),
        })
    }

    /// Overrides the scope requested for interactive grants.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Overrides how device grants are shown to the operator.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Fn(&DeviceGrant) + Send + Sync + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    /// Client identity the credentials belong to.
    #[must_use]
    pub fn client_id(&self) -> &str {
        self.endpoint.client_id()
    }

    /// Credentials currently held in memory.
    #[must_use]
    pub const fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    /// Device grants requested but not yet polled.
    #[must_use]
    pub fn pending_grants(&self) -> usize {
        self.device_grants.len()
    }

    /// Requests a device grant and shows it to the operator.
    ///
    /// Returns the device code to poll with, or `None` if the request failed.
    pub async fn request_device_grant(&mut self) -> Option<String> {
        let auth = match self.endpoint.request_device_authorization(&self.scope).await {
            Ok(auth) => auth,
            Err(e) => {
                warn!("Device authorization request failed: {e}");
                return None;
            }
        };

        let grant = DeviceGrant::from_authorization(auth, self.clock.now());
        (self.prompt)(&grant);

        let device_code = grant.device_code.clone();
        self.device_grants.insert(device_code.clone(), grant);
        Some(device_code)
    }

    /// Polls the token endpoint until the grant behind `device_code` resolves.
    ///
    /// The grant is consumed: a second call with the same code returns `None`.
    pub async fn poll_device_code(&mut self, device_code: &str) -> Option<AccessToken> {
        let grant = self.device_grants.remove(device_code)?;

        while grant.is_valid_at(self.clock.now()) {
            tokio::time::sleep(grant.poll_interval).await;

            match self.endpoint.exchange_device_code(&grant.device_code).await {
                Ok(response) => {
                    let now = self.clock.now();
                    let pair = CredentialPair::from_response(response, now);
                    let token = pair.access_token(now);
                    self.credentials.insert(pair, now);
                    info!("Device authorization completed");
                    return token;
                }
                Err(e) if e.is_authorization_pending() => {
                    debug!("Authorization pending for user code {}", grant.user_code);
                }
                Err(e) => {
                    warn!("Device code exchange failed: {e}");
                    return None;
                }
            }
        }

        warn!("Device grant for user code {} expired", grant.user_code);
        None
    }

    /// Exchanges the refresh token of `pair` for a new pair.
    ///
    /// The new pair supersedes `pair` only while it is still live.
    async fn refresh(&mut self, pair: &CredentialPair) -> Option<AccessToken> {
        let refresh_token = match pair.refresh_token() {
            Ok(token) => token,
            Err(e) => {
                debug!("Skipping refresh: {e}");
                return None;
            }
        };

        let response = match self.endpoint.exchange_refresh_token(refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Token refresh failed: {e}");
                return None;
            }
        };

        let now = self.clock.now();
        let refreshed = CredentialPair::from_response(response, now)
            .or_refresh_token(pair.refresh_token.clone());
        if !refreshed.is_live(now) {
            warn!("Discarding refreshed credential that is already expired");
            return None;
        }

        let token = refreshed.access_token(now);
        self.credentials.replace(pair, refreshed, now);
        debug!("Access token refreshed");
        token
    }

    async fn acquire_interactively(&mut self) -> Option<AccessToken> {
        let device_code = self.request_device_grant().await?;
        self.poll_device_code(&device_code).await
    }
}

#[async_trait]
impl<E: TokenEndpoint, C: Clock> TokenHandler for DeviceCodeHandler<E, C> {
    async fn get_access_token(&mut self, silently: bool) -> Option<AccessToken> {
        let now = self.clock.now();
        if let Some(pair) = self.credentials.current(now).cloned() {
            if let Some(token) = pair.access_token(now) {
                return Some(token);
            }
            if pair.is_refreshable(now) {
                if let Some(token) = self.refresh(&pair).await {
                    return Some(token);
                }
            }
        }

        if silently {
            return None;
        }
        self.acquire_interactively().await
    }

    async fn load_credentials(&mut self, store: &CredentialStore) {
        let stored = match store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                warn!("Ignoring unreadable credential file {}: {e}", store.path().display());
                return;
            }
        };

        if stored.client_id != self.client_id() {
            info!(
                "Ignoring stored credentials issued to client {}",
                stored.client_id
            );
            return;
        }

        self.credentials.clear();
        for pair in stored.tokens {
            let now = self.clock.now();
            if pair.is_usable(now) {
                self.credentials.insert(pair, now);
            } else if pair.is_refreshable(now) && self.refresh(&pair).await.is_none() {
                debug!("Dropping stored credential that could not be refreshed");
            }
        }

        info!("Loaded {} credential(s)", self.credentials.len());
    }

    fn save_credentials(&self, store: &CredentialStore) -> Result<()> {
        let now = self.clock.now();
        let tokens = self
            .credentials
            .usable(now)
            .into_iter()
            .cloned()
            .collect();

        store.save(&StoredCredentials {
            client_id: self.client_id().to_string(),
            tokens,
        })
    }
}

impl<E, C> fmt::Debug for DeviceCodeHandler<E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCodeHandler")
            .field("scope", &self.scope)
            .field("device_grants", &self.device_grants.len())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::print_stdout)]
fn print_prompt(grant: &DeviceGrant) {
    println!(
        "Please navigate to {} and enter the code {} to authenticate.",
        grant.verification_uri, grant.user_code
    );
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
    use crate::clock::MockClock;
    use crate::flow::DeviceAuthorization;
    use crate::token::TokenResponse;
    use chrono::Duration;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted token endpoint counting every exchange.
    #[derive(Default)]
    struct FakeEndpoint {
        clock: Option<Arc<MockClock>>,
        advance_per_poll: Option<Duration>,
        device_replies: Mutex<VecDeque<Result<TokenResponse>>>,
        refresh_replies: Mutex<VecDeque<Result<TokenResponse>>>,
        grant_interval: Option<i64>,
        authorizations: AtomicUsize,
        polls: AtomicUsize,
        refreshes: AtomicUsize,
    }

    impl FakeEndpoint {
        fn calls(&self) -> usize {
            self.authorizations.load(Ordering::SeqCst)
                + self.polls.load(Ordering::SeqCst)
                + self.refreshes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenEndpoint for Arc<FakeEndpoint> {
        fn client_id(&self) -> &str {
            "test-client"
        }

        async fn request_device_authorization(&self, _scope: &str) -> Result<DeviceAuthorization> {
            self.authorizations.fetch_add(1, Ordering::SeqCst);
            Ok(DeviceAuthorization {
                device_code: "device-1".to_string(),
                user_code: "ABCD-1234".to_string(),
                verification_uri: "https://microsoft.com/devicelogin".to_string(),
                expires_in: Some(900),
                interval: self.grant_interval.or(Some(5)),
                message: None,
            })
        }

        async fn exchange_device_code(&self, _device_code: &str) -> Result<TokenResponse> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if let (Some(clock), Some(step)) = (&self.clock, self.advance_per_poll) {
                clock.advance(step);
            }
            self.device_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::oauth_error("authorization_pending", "")))
        }

        async fn exchange_refresh_token(&self, _refresh_token: &str) -> Result<TokenResponse> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.refresh_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::oauth_error("invalid_grant", "")))
        }
    }

    fn token(name: &str, expires_in: i64, ext_expires_in: i64) -> TokenResponse {
        TokenResponse {
            access_token: name.to_string(),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(expires_in),
            ext_expires_in: Some(ext_expires_in),
            refresh_token: Some(format!("{name}-refresh")),
            scope: Some("Mail.Send".to_string()),
        }
    }

    fn pending() -> Result<TokenResponse> {
        Err(Error::oauth_error("authorization_pending", "waiting"))
    }

    type Handler = DeviceCodeHandler<Arc<FakeEndpoint>, Arc<MockClock>>;

    fn handler(endpoint: &Arc<FakeEndpoint>, clock: &Arc<MockClock>) -> Handler {
        DeviceCodeHandler::with_clock(Arc::clone(endpoint), Arc::clone(clock))
            .unwrap()
            .with_prompt(|_| {})
    }

    fn seed(handler: &mut Handler, clock: &MockClock, response: TokenResponse) {
        let now = clock.now();
        handler
            .credentials
            .insert(CredentialPair::from_response(response, now), now);
    }

    #[test]
    fn test_missing_client_id_is_fatal() {
        struct Anonymous;

        #[async_trait]
        impl TokenEndpoint for Anonymous {
            fn client_id(&self) -> &str {
                ""
            }
            async fn request_device_authorization(&self, _: &str) -> Result<DeviceAuthorization> {
                unreachable!()
            }
            async fn exchange_device_code(&self, _: &str) -> Result<TokenResponse> {
                unreachable!()
            }
            async fn exchange_refresh_token(&self, _: &str) -> Result<TokenResponse> {
                unreachable!()
            }
        }

        assert!(matches!(
            DeviceCodeHandler::new(Anonymous),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_returns_cached_token_without_network() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let clock = MockClock::shared();
        let mut handler = handler(&endpoint, &clock);
        seed(&mut handler, &clock, token("cached", 3600, 7200));

        let token = handler.get_access_token(true).await.unwrap();

        assert_eq!(token.access_token, "cached");
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_current_token_prefers_latest_expiry() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let clock = MockClock::shared();
        let mut handler = handler(&endpoint, &clock);
        seed(&mut handler, &clock, token("long", 3600, 7200));
        seed(&mut handler, &clock, token("short", 600, 7200));

        let token = handler.get_access_token(true).await.unwrap();
        assert_eq!(token.access_token, "long");
    }

    #[tokio::test]
    async fn test_silent_returns_none_when_empty() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let clock = MockClock::shared();
        let mut handler = handler(&endpoint, &clock);

        assert!(handler.get_access_token(true).await.is_none());
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_silent_returns_none_when_all_dead() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let clock = MockClock::shared();
        let mut handler = handler(&endpoint, &clock);
        seed(&mut handler, &clock, token("old", 60, 120));

        clock.advance(Duration::seconds(120));

        assert!(handler.get_access_token(true).await.is_none());
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_refreshes_expired_primary() {
        let endpoint = Arc::new(FakeEndpoint::default());
        endpoint
            .refresh_replies
            .lock()
            .unwrap()
            .push_back(Ok(token("fresh", 3600, 7200)));
        let clock = MockClock::shared();
        let mut handler = handler(&endpoint, &clock);
        seed(&mut handler, &clock, token("stale", 60, 7200));

        clock.advance(Duration::seconds(61));
        let token = handler.get_access_token(true).await.unwrap();

        assert_eq!(token.access_token, "fresh");
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
        let names: Vec<_> = handler
            .credentials()
            .iter()
            .map(|p| p.access_token.as_str())
            .collect();
        assert_eq!(names, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_refresh_token() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let mut reply = token("fresh", 3600, 7200);
        reply.refresh_token = None;
        endpoint.refresh_replies.lock().unwrap().push_back(Ok(reply));
        let clock = MockClock::shared();
        let mut handler = handler(&endpoint, &clock);
        seed(&mut handler, &clock, token("stale", 60, 7200));

        clock.advance(Duration::seconds(61));
        handler.get_access_token(true).await.unwrap();

        let pair = handler.credentials().current(clock.now()).unwrap();
        assert_eq!(pair.refresh_token.as_deref(), Some("stale-refresh"));
    }

    #[tokio::test]
    async fn test_dead_refresh_result_is_discarded() {
        let endpoint = Arc::new(FakeEndpoint::default());
        endpoint
            .refresh_replies
            .lock()
            .unwrap()
            .push_back(Ok(token("already-dead", 0, 0)));
        let clock = MockClock::shared();
        let mut handler = handler(&endpoint, &clock);
        seed(&mut handler, &clock, token("stale", 60, 7200));

        clock.advance(Duration::seconds(61));

        assert!(handler.get_access_token(true).await.is_none());
        let names: Vec<_> = handler
            .credentials()
            .iter()
            .map(|p| p.access_token.as_str())
            .collect();
        assert_eq!(names, vec!["stale"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactive_polls_until_issued() {
        let endpoint = Arc::new(FakeEndpoint::default());
        endpoint.device_replies.lock().unwrap().extend([
            pending(),
            pending(),
            pending(),
            Ok(token("interactive", 3600, 7200)),
        ]);
        let clock = MockClock::shared();
        let mut handler = handler(&endpoint, &clock);

        let started = tokio::time::Instant::now();
        let token = handler.get_access_token(false).await.unwrap();

        assert_eq!(token.access_token, "interactive");
        assert_eq!(endpoint.polls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), std::time::Duration::from_secs(20));
        assert_eq!(handler.pending_grants(), 0);
        assert_eq!(handler.credentials().len(), 1);

        assert!(handler.poll_device_code("device-1").await.is_none());
        assert_eq!(endpoint.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_falls_back_to_interactive() {
        let endpoint = Arc::new(FakeEndpoint {
            grant_interval: Some(3),
            ..FakeEndpoint::default()
        });
        endpoint
            .device_replies
            .lock()
            .unwrap()
            .push_back(Ok(token("interactive", 3600, 7200)));
        let clock = MockClock::shared();
        let shown = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&shown);
        let mut handler = DeviceCodeHandler::with_clock(Arc::clone(&endpoint), Arc::clone(&clock))
            .unwrap()
            .with_prompt(move |grant| {
                seen.lock()
                    .unwrap()
                    .push((grant.user_code.clone(), grant.verification_uri.clone()));
            });
        seed(&mut handler, &clock, token("stale", 60, 7200));
        clock.advance(Duration::seconds(61));

        assert!(handler.get_access_token(true).await.is_none());
        assert!(shown.lock().unwrap().is_empty());

        let started = tokio::time::Instant::now();
        let token = handler.get_access_token(false).await.unwrap();

        assert_eq!(token.access_token, "interactive");
        assert_eq!(started.elapsed(), std::time::Duration::from_secs(3));
        assert_eq!(
            shown.lock().unwrap().as_slice(),
            &[(
                "ABCD-1234".to_string(),
                "https://microsoft.com/devicelogin".to_string()
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_on_provider_error() {
        let endpoint = Arc::new(FakeEndpoint::default());
        endpoint.device_replies.lock().unwrap().extend([
            pending(),
            Err(Error::oauth_error("expired_token", "")),
            Ok(token("never", 3600, 7200)),
        ]);
        let clock = MockClock::shared();
        let mut handler = handler(&endpoint, &clock);

        assert!(handler.get_access_token(false).await.is_none());
        assert_eq!(endpoint.polls.load(Ordering::SeqCst), 2);
        assert!(handler.credentials().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_when_grant_expires() {
        let clock = MockClock::shared();
        let endpoint = Arc::new(FakeEndpoint {
            clock: Some(Arc::clone(&clock)),
            advance_per_poll: Some(Duration::seconds(300)),
            ..FakeEndpoint::default()
        });
        let mut handler = handler(&endpoint, &clock);

        assert!(handler.get_access_token(false).await.is_none());
        assert_eq!(endpoint.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let endpoint = Arc::new(FakeEndpoint::default());
        let clock = MockClock::shared();

        let mut original = handler(&endpoint, &clock);
        seed(&mut original, &clock, token("a", 3600, 7200));
        seed(&mut original, &clock, token("b", 1800, 7200));
        seed(&mut original, &clock, token("refresh-only", 0, 7200));
        original.save_credentials(&store).unwrap();

        let mut restored = handler(&endpoint, &clock);
        restored.load_credentials(&store).await;

        let names: Vec<_> = restored
            .credentials()
            .iter()
            .map(|p| p.access_token.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_load_refreshes_and_drops_dead_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let clock = MockClock::shared();
        let now = clock.now();
        store
            .save(&StoredCredentials {
                client_id: "test-client".to_string(),
                tokens: vec![
                    CredentialPair::from_response(token("dead", 10, 10), now),
                    CredentialPair::from_response(token("stale", 10, 7200), now),
                ],
            })
            .unwrap();

        let endpoint = Arc::new(FakeEndpoint::default());
        endpoint
            .refresh_replies
            .lock()
            .unwrap()
            .push_back(Ok(token("fresh", 3600, 7200)));
        clock.advance(Duration::seconds(30));

        let mut handler = handler(&endpoint, &clock);
        handler.load_credentials(&store).await;

        let names: Vec<_> = handler
            .credentials()
            .iter()
            .map(|p| p.access_token.as_str())
            .collect();
        assert_eq!(names, vec!["fresh"]);
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_drops_pair_when_refresh_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let clock = MockClock::shared();
        let now = clock.now();
        store
            .save(&StoredCredentials {
                client_id: "test-client".to_string(),
                tokens: vec![
                    CredentialPair::from_response(token("stale", 10, 7200), now),
                    CredentialPair::from_response(token("valid", 3600, 7200), now),
                ],
            })
            .unwrap();
        clock.advance(Duration::seconds(30));

        let endpoint = Arc::new(FakeEndpoint::default());
        let mut handler = handler(&endpoint, &clock);
        handler.load_credentials(&store).await;

        let names: Vec<_> = handler
            .credentials()
            .iter()
            .map(|p| p.access_token.as_str())
            .collect();
        assert_eq!(names, vec!["valid"]);
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_ignores_other_client() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let clock = MockClock::shared();
        store
            .save(&StoredCredentials {
                client_id: "someone-else".to_string(),
                tokens: vec![CredentialPair::from_response(
                    token("foreign", 3600, 7200),
                    clock.now(),
                )],
            })
            .unwrap();

        let endpoint = Arc::new(FakeEndpoint::default());
        let mut handler = handler(&endpoint, &clock);
        handler.load_credentials(&store).await;

        assert!(handler.credentials().is_empty());
        assert!(handler.get_access_token(true).await.is_none());
    }

    #[tokio::test]
    async fn test_load_survives_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "not json at all").unwrap();

        let endpoint = Arc::new(FakeEndpoint::default());
        let clock = MockClock::shared();
        let mut handler = handler(&endpoint, &clock);
        handler.load_credentials(&CredentialStore::new(path)).await;

        assert!(handler.credentials().is_empty());
    }
}
