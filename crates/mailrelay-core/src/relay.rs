//! The relay loop: drains the mail queue while keeping a token at hand.
//!
//! The loop alternates between two states:
//!
//! ```text
//!            token obtained
//! Refreshing ──────────────→ Draining ──┐ message: send, stay
//!      ↑                        │  ←────┘
//!      └──── queue timeout ─────┘
//! ```
//!
//! The queue wait never outlives the token: it is bounded by the token's
//! remaining lifetime, minus [`SAFETY_MARGIN`] once that lifetime exceeds
//! [`MARGIN_FLOOR`]. A dequeued message is therefore always sent with a
//! token that is still valid, and an idle relay refreshes ahead of expiry.

use crate::error::{Error, Result};
use crate::sender::MailSender;
use chrono::TimeDelta;
use mailrelay_oauth::clock::{Clock, SystemClock};
use mailrelay_oauth::{AccessToken, CredentialStore, TokenHandler};
use mailrelay_smtp::Envelope;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Subtracted from the queue wait for long-lived tokens.
pub const SAFETY_MARGIN: TimeDelta = TimeDelta::seconds(30);

/// Remaining lifetime above which [`SAFETY_MARGIN`] applies.
pub const MARGIN_FLOOR: TimeDelta = TimeDelta::seconds(60);

/// Pause before a new attempt when interactive authorization yields nothing.
pub const INTERACTIVE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long to wait on the queue given the token's remaining lifetime.
#[must_use]
pub fn queue_timeout(remaining: TimeDelta) -> Duration {
    let wait = if remaining > MARGIN_FLOOR {
        remaining - SAFETY_MARGIN
    } else {
        remaining
    };
    wait.to_std().unwrap_or(Duration::ZERO)
}

/// Creates the queue between the listener and the relay loop.
#[must_use]
pub fn mail_queue() -> (UnboundedSender<Envelope>, UnboundedReceiver<Envelope>) {
    mpsc::unbounded_channel()
}

enum State {
    Refreshing,
    Draining(AccessToken),
}

/// Consumer side of the mail queue.
pub struct RelayLoop<H, S, C = SystemClock> {
    handler: H,
    sender: S,
    clock: C,
    store: CredentialStore,
    inbox: UnboundedReceiver<Envelope>,
    shutdown: CancellationToken,
}

impl<H, S> RelayLoop<H, S>
where
    H: TokenHandler,
    S: MailSender,
{
    /// Creates a relay loop reading from `inbox` until `shutdown` fires.
    pub fn new(
        handler: H,
        sender: S,
        store: CredentialStore,
        inbox: UnboundedReceiver<Envelope>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handler,
            sender,
            clock: SystemClock,
            store,
            inbox,
            shutdown,
        }
    }
}

impl<H, S, C> RelayLoop<H, S, C>
where
    H: TokenHandler,
    S: MailSender,
    C: Clock,
{
    /// Replaces the clock used for expiry decisions.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> RelayLoop<H, S, C2> {
        RelayLoop {
            handler: self.handler,
            sender: self.sender,
            clock,
            store: self.store,
            inbox: self.inbox,
            shutdown: self.shutdown,
        }
    }

    /// The token handler.
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Runs until shutdown or until every queue sender is dropped.
    ///
    /// Messages still queued at that point are not delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot be persisted on exit.
    pub async fn run(&mut self) -> Result<()> {
        let mut state = State::Refreshing;

        loop {
            state = match state {
                State::Refreshing => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    match self.obtain_token().await {
                        Some(token) => State::Draining(token),
                        None => {
                            self.pause_before_retry().await;
                            State::Refreshing
                        }
                    }
                }
                State::Draining(token) => {
                    let wait = queue_timeout(token.remaining(self.clock.now()));
                    debug!("Waiting up to {}s for mail", wait.as_secs());

                    tokio::select! {
                        biased;
                        () = self.shutdown.cancelled() => break,
                        received = tokio::time::timeout(wait, self.inbox.recv()) => match received {
                            Ok(Some(envelope)) => {
                                if let Err(e) = self.deliver(&envelope, &token).await {
                                    error!("Dropping message for {} recipient(s): {e}", envelope.rcpt_to.len());
                                }
                                State::Draining(token)
                            }
                            Ok(None) => {
                                info!("Mail queue closed");
                                break;
                            }
                            Err(_) => {
                                info!("Refreshing access token");
                                State::Refreshing
                            }
                        },
                    }
                }
            };
        }

        info!("Relay stopping, saving credentials");
        self.handler.save_credentials(&self.store)?;
        Ok(())
    }

    /// Silent acquisition first, then the interactive flow.
    async fn obtain_token(&mut self) -> Option<AccessToken> {
        let token = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return None,
            token = self.handler.get_access_token(true) => token,
        };

        let token = match token {
            Some(token) => token,
            None => {
                info!("No token available without user interaction");
                tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => return None,
                    token = self.handler.get_access_token(false) => token?,
                }
            }
        };

        info!("Using access token {token}");
        if let Err(e) = self.handler.save_credentials(&self.store) {
            warn!(
                "Failed to save credentials to {}: {e}",
                self.store.path().display()
            );
        }
        Some(token)
    }

    async fn pause_before_retry(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        warn!(
            "Authorization failed, retrying in {}s",
            INTERACTIVE_RETRY_DELAY.as_secs()
        );
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = tokio::time::sleep(INTERACTIVE_RETRY_DELAY) => {}
        }
    }

    async fn deliver(&self, envelope: &Envelope, token: &AccessToken) -> Result<()> {
        if !token.is_valid_at(self.clock.now()) {
            return Err(Error::NoUsableToken);
        }
        self.sender.send(envelope, token).await
    }
}

impl<H, S, C> std::fmt::Debug for RelayLoop<H, S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayLoop")
            .field("store", &self.store.path())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
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
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use mailrelay_smtp::Address;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Wall clock tied to tokio's (paused) time.
    struct PausedClock {
        base: DateTime<Utc>,
        start: Instant,
    }

    impl Clock for PausedClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + TimeDelta::from_std(self.start.elapsed()).unwrap()
        }
    }

    struct FakeHandler {
        script: VecDeque<Option<AccessToken>>,
        calls: Vec<(bool, Duration)>,
        saves: AtomicUsize,
        start: Instant,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl TokenHandler for FakeHandler {
        async fn get_access_token(&mut self, silently: bool) -> Option<AccessToken> {
            self.calls.push((silently, self.start.elapsed()));
            let Some(next) = self.script.pop_front() else {
                self.shutdown.cancel();
                return None;
            };
            next
        }

        async fn load_credentials(&mut self, _store: &CredentialStore) {}

        fn save_credentials(&self, _store: &CredentialStore) -> mailrelay_oauth::Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeSender {
        sent: Arc<Mutex<Vec<(Duration, String)>>>,
        start: Option<Instant>,
        stop_after_send: Option<CancellationToken>,
    }

    #[async_trait]
    impl MailSender for FakeSender {
        async fn send(&self, _envelope: &Envelope, token: &AccessToken) -> Result<()> {
            let at = self.start.map(|s| s.elapsed()).unwrap_or_default();
            self.sent
                .lock()
                .unwrap()
                .push((at, token.access_token.clone()));
            if let Some(shutdown) = &self.stop_after_send {
                shutdown.cancel();
            }
            Ok(())
        }
    }

    struct Harness {
        base: DateTime<Utc>,
        start: Instant,
        shutdown: CancellationToken,
        queue: UnboundedSender<Envelope>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn token(&self, name: &str, lifetime_secs: i64) -> AccessToken {
            AccessToken {
                access_token: name.to_string(),
                token_type: "Bearer".to_string(),
                scope: None,
                expires_at: self.base + TimeDelta::seconds(lifetime_secs),
            }
        }
    }

    fn setup(
        script: impl FnOnce(&Harness) -> Vec<Option<AccessToken>>,
        sender: FakeSender,
    ) -> (Harness, RelayLoop<FakeHandler, FakeSender, PausedClock>) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let (queue, inbox) = mail_queue();
        let harness = Harness {
            base: Utc::now(),
            start: Instant::now(),
            shutdown: CancellationToken::new(),
            queue,
            _dir: dir,
        };

        let handler = FakeHandler {
            script: script(&harness).into(),
            calls: Vec::new(),
            saves: AtomicUsize::new(0),
            start: harness.start,
            shutdown: harness.shutdown.clone(),
        };
        let clock = PausedClock {
            base: harness.base,
            start: harness.start,
        };
        let relay = RelayLoop::new(handler, sender, store, inbox, harness.shutdown.clone())
            .with_clock(clock);
        (harness, relay)
    }

    fn envelope() -> Envelope {
        Envelope {
            mail_from: None,
            rcpt_to: vec![Address::new("bob@example.com").unwrap()],
            data: b"Subject: test\r\n\r\nbody\r\n".to_vec(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_queue_timeout_applies_margin_above_floor() {
        assert_eq!(queue_timeout(TimeDelta::seconds(100)), Duration::from_secs(70));
        assert_eq!(queue_timeout(TimeDelta::seconds(61)), Duration::from_secs(31));
    }

    #[test]
    fn test_queue_timeout_without_margin_at_or_below_floor() {
        assert_eq!(queue_timeout(TimeDelta::seconds(40)), Duration::from_secs(40));
        assert_eq!(queue_timeout(TimeDelta::seconds(60)), Duration::from_secs(60));
        assert_eq!(queue_timeout(TimeDelta::seconds(-5)), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_queue_timeout_never_outlives_token(millis in -100_000i64..10_000_000) {
            let remaining = TimeDelta::milliseconds(millis);
            let wait = TimeDelta::from_std(queue_timeout(remaining)).unwrap();

            prop_assert!(wait <= remaining.max(TimeDelta::zero()));
            if remaining > MARGIN_FLOOR {
                prop_assert_eq!(remaining - wait, SAFETY_MARGIN);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_queue_refreshes_when_token_runs_out() {
        let (harness, mut relay) = setup(|h| vec![Some(h.token("short", 45))], FakeSender::default());

        relay.run().await.unwrap();

        let calls = &relay.handler().calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (true, Duration::ZERO));
        assert!(calls[1].0, "refresh after timeout must be silent");
        assert_eq!(calls[1].1.as_secs(), 45);
        drop(harness);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_sent_with_current_token() {
        let start = Instant::now();
        let stop_signal = CancellationToken::new();
        let sender = FakeSender {
            start: Some(start),
            stop_after_send: Some(stop_signal.clone()),
            ..FakeSender::default()
        };
        let sent = Arc::clone(&sender.sent);
        let (harness, mut relay) = setup(|h| vec![Some(h.token("valid", 100))], sender);

        let queue = harness.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            queue.send(envelope()).unwrap();
        });
        let shutdown = harness.shutdown.clone();
        tokio::spawn(async move {
            stop_signal.cancelled().await;
            shutdown.cancel();
        });

        relay.run().await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_secs(), 10);
        assert_eq!(sent[0].1, "valid");
        assert_eq!(relay.handler().calls.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_interactive_and_persists() {
        let (harness, mut relay) =
            setup(|h| vec![None, Some(h.token("fresh", 3600))], FakeSender::default());
        drop(harness.queue);

        relay.run().await.unwrap();

        let handler = relay.handler();
        let modes: Vec<bool> = handler.calls.iter().map(|(silent, _)| *silent).collect();
        assert_eq!(modes, vec![true, false]);
        // once after acquisition, once on exit
        assert_eq!(handler.saves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_abandoned_authorization() {
        let (harness, mut relay) =
            setup(|h| vec![None, None, Some(h.token("late", 3600))], FakeSender::default());
        drop(harness.queue);

        relay.run().await.unwrap();

        let calls = &relay.handler().calls;
        assert_eq!(calls.len(), 3);
        assert!(calls[2].0);
        assert_eq!(calls[2].1, INTERACTIVE_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_draining_saves_credentials() {
        let (harness, mut relay) = setup(|h| vec![Some(h.token("t", 3600))], FakeSender::default());
        let shutdown = harness.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            shutdown.cancel();
        });

        relay.run().await.unwrap();

        assert_eq!(relay.handler().calls.len(), 1);
        assert_eq!(relay.handler().saves.load(Ordering::SeqCst), 2);
        assert_eq!(harness.start.elapsed().as_secs(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_not_used() {
        let sender = FakeSender::default();
        let sent = Arc::clone(&sender.sent);
        let (harness, relay) = setup(|_| Vec::new(), sender);

        let result = relay.deliver(&envelope(), &harness.token("old", -1)).await;

        assert!(matches!(result, Err(Error::NoUsableToken)));
        assert!(sent.lock().unwrap().is_empty());
    }
}
