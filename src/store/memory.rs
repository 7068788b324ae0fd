//! In-process counter store.
//!
//! Entries live in a sharded map. Each increment holds the shard lock for the
//! key for the whole read-modify-write, so concurrent tasks in this process
//! never lose an update. Expiry is lazy: an expired entry is reset on its next
//! increment, and `purge_expired` drops the rest.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::ratelimit::CounterStore;

/// Expiry used when `now + timeout` overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 86400);

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: f64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn empty() -> Self {
        Self {
            value: 0.0,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A counter store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, Entry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for `key`, if it exists and has not expired.
    pub fn get(&self, key: &str) -> Option<f64> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value)
    }

    /// Remaining time to live for `key`, if it exists and has not expired.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(
        &self,
        key: &str,
        delta: f64,
        timeout: Duration,
    ) -> Result<f64, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(Entry::empty);

        if entry.is_expired(now) {
            *entry = Entry::empty();
        }

        entry.value += delta;
        if entry.expires_at.is_none() {
            entry.expires_at = Some(now.checked_add(timeout).unwrap_or(now + FAR_FUTURE));
        }

        Ok(entry.value)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut removed = 0;
        self.counters.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_creates_entry() {
        let store = MemoryStore::new();

        let count = store.increment("key", 1.0, Duration::from_secs(10)).await.unwrap();

        assert_eq!(count, 1.0);
        assert_eq!(store.get("key"), Some(1.0));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_fractional_deltas() {
        let store = MemoryStore::new();

        store.increment("key", 0.25, Duration::from_secs(10)).await.unwrap();
        let count = store.increment("key", 0.5, Duration::from_secs(10)).await.unwrap();

        assert_eq!(count, 0.75);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_set_once() {
        let store = MemoryStore::new();

        store.increment("key", 1.0, Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.ttl("key"), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(3)).await;
        let count = store.increment("key", 1.0, Duration::from_secs(10)).await.unwrap();

        assert_eq!(count, 2.0);
        assert_eq!(store.ttl("key"), Some(Duration::from_secs(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_resets() {
        let store = MemoryStore::new();

        store.increment("key", 1.0, Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(store.get("key"), None);
        assert_eq!(store.ttl("key"), None);

        let count = store.increment("key", 1.0, Duration::from_secs(10)).await.unwrap();
        assert_eq!(count, 1.0);
        assert_eq!(store.ttl("key"), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();

        store.increment("short", 1.0, Duration::from_secs(5)).await.unwrap();
        store.increment("long", 1.0, Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("long"), Some(1.0));
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_overflow() {
        let store = MemoryStore::new();
        let count = store.increment("key", 1.0, Duration::MAX).await.unwrap();

        assert_eq!(count, 1.0);
        assert!(store.ttl("key").is_some());
    }

    #[tokio::test]
    async fn test_separate_keys() {
        let store = MemoryStore::new();

        store.increment("a", 5.0, Duration::from_secs(10)).await.unwrap();
        store.increment("b", 3.0, Duration::from_secs(10)).await.unwrap();

        assert_eq!(store.get("a"), Some(5.0));
        assert_eq!(store.get("b"), Some(3.0));
    }
}
