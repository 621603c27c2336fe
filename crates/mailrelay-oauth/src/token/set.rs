//! Ordered collection of credential pairs.

use super::CredentialPair;
use chrono::{DateTime, Utc};

/// The credential pairs held by one token handler.
///
/// Readers of "the current credential" always get the live pair with the
/// latest primary expiry; on ties the most recently inserted pair wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    pairs: Vec<CredentialPair>,
}

impl CredentialSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pairs currently held, dead ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if the set holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterates over all pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &CredentialPair> {
        self.pairs.iter()
    }

    /// The live pair with the latest primary expiry.
    #[must_use]
    pub fn current(&self, now: DateTime<Utc>) -> Option<&CredentialPair> {
        self.pairs
            .iter()
            .filter(|pair| pair.is_live(now))
            .max_by_key(|pair| pair.not_after)
    }

    /// Pairs usable for direct access at `now`, freshest first.
    #[must_use]
    pub fn usable(&self, now: DateTime<Utc>) -> Vec<&CredentialPair> {
        let mut usable: Vec<_> = self.pairs.iter().filter(|p| p.is_usable(now)).collect();
        usable.sort_by(|a, b| b.not_after.cmp(&a.not_after));
        usable
    }

    /// Adds a pair, dropping pairs that are dead at `now`.
    pub fn insert(&mut self, pair: CredentialPair, now: DateTime<Utc>) {
        self.prune(now);
        self.pairs.push(pair);
    }

    /// Replaces `old` with `new`, dropping pairs that are dead at `now`.
    ///
    /// `new` is still inserted when `old` is not part of the set.
    pub fn replace(&mut self, old: &CredentialPair, new: CredentialPair, now: DateTime<Utc>) {
        self.pairs.retain(|pair| pair != old);
        self.insert(new, now);
    }

    /// Drops every pair that is dead at `now`.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.pairs.retain(|pair| pair.is_live(now));
    }

    /// Removes all pairs.
    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::token::TokenResponse;
    use chrono::Duration;

    fn pair(name: &str, now: DateTime<Utc>, expires_in: i64, ext_expires_in: i64) -> CredentialPair {
        CredentialPair::from_response(
            TokenResponse {
                access_token: name.to_string(),
                token_type: None,
                expires_in: Some(expires_in),
                ext_expires_in: Some(ext_expires_in),
                refresh_token: Some(format!("{name}-refresh")),
                scope: None,
            },
            now,
        )
    }

    #[test]
    fn test_current_prefers_latest_primary_expiry() {
        let now = Utc::now();
        let mut set = CredentialSet::new();
        set.insert(pair("older", now, 600, 6000), now);
        set.insert(pair("newer", now, 1200, 1200), now);
        set.insert(pair("middle", now, 900, 9000), now);

        assert_eq!(set.current(now).unwrap().access_token, "newer");
    }

    #[test]
    fn test_current_tie_prefers_latest_insert() {
        let now = Utc::now();
        let mut set = CredentialSet::new();
        set.insert(pair("first", now, 600, 600), now);
        set.insert(pair("second", now, 600, 600), now);

        assert_eq!(set.current(now).unwrap().access_token, "second");
    }

    #[test]
    fn test_current_skips_dead_pairs() {
        let now = Utc::now();
        let mut set = CredentialSet::new();
        set.insert(pair("short", now, 60, 120), now);

        let later = now + Duration::seconds(90);
        assert_eq!(set.current(later).unwrap().access_token, "short");
        assert!(set.current(now + Duration::seconds(120)).is_none());
    }

    #[test]
    fn test_usable_sorted_freshest_first() {
        let now = Utc::now();
        let mut set = CredentialSet::new();
        set.insert(pair("a", now, 100, 100), now);
        set.insert(pair("b", now, 300, 300), now);
        set.insert(pair("c", now, 0, 300), now);

        let usable: Vec<_> = set.usable(now).iter().map(|p| p.access_token.as_str()).collect();
        assert_eq!(usable, vec!["b", "a"]);
    }

    #[test]
    fn test_insert_prunes_dead_pairs() {
        let now = Utc::now();
        let mut set = CredentialSet::new();
        set.insert(pair("dead", now, 10, 10), now);

        let later = now + Duration::seconds(30);
        set.insert(pair("fresh", later, 60, 60), later);

        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().access_token, "fresh");
    }

    #[test]
    fn test_replace_supersedes_old_pair() {
        let now = Utc::now();
        let mut set = CredentialSet::new();
        let old = pair("old", now, 10, 600);
        set.insert(old.clone(), now);
        set.insert(pair("other", now, 5, 600), now);

        set.replace(&old, pair("new", now, 60, 600), now);

        let names: Vec<_> = set.iter().map(|p| p.access_token.as_str()).collect();
        assert_eq!(names, vec!["other", "new"]);
    }

    #[test]
    fn test_clear() {
        let now = Utc::now();
        let mut set = CredentialSet::new();
        set.insert(pair("a", now, 10, 10), now);
        set.clear();
        assert!(set.is_empty());
    }
}
