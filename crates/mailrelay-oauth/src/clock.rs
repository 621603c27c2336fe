//! Wall-clock abstraction for testability.
//!
//! Every expiry decision (credential pairs, device grants, relay timeouts)
//! reads the time through a [`Clock`], so tests can drive token lifetimes
//! without sleeping.
//!
//! # Example
//!
//! ```
//! use mailrelay_oauth::clock::{Clock, MockClock};
//! use chrono::Duration;
//!
//! let clock = MockClock::new();
//! let start = clock.now();
//! clock.advance(Duration::seconds(30));
//! assert_eq!(clock.now() - start, Duration::seconds(30));
//! ```

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};

/// Abstraction over wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// System clock that uses real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock for tests.
#[derive(Debug)]
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    /// Creates a mock clock starting at the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Creates a mock clock starting at the given instant.
    #[must_use]
    pub const fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Creates a mock clock that can be shared across threads.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += duration;
    }

    /// Sets the clock to a specific instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        self.as_ref().now()
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
    fn test_system_clock() {
        let before = Utc::now();
        let now = SystemClock.now();
        let after = Utc::now();

        assert!(now >= before);
        assert!(now <= after);
    }

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();

        clock.advance(Duration::seconds(10));
        assert_eq!(clock.now() - start, Duration::seconds(10));

        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now() - start, Duration::seconds(15));
    }

    #[test]
    fn test_mock_clock_set() {
        let start = Utc::now();
        let clock = MockClock::at(start);

        clock.set(start + Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }

    #[test]
    fn test_shared_mock_clock() {
        let clock = MockClock::shared();
        let clock2 = Arc::clone(&clock);

        let start = clock.now();
        clock2.advance(Duration::seconds(10));

        assert_eq!(clock.now() - start, Duration::seconds(10));
    }
}
