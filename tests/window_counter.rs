//! Protocol behavior against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use window_counter::error::{CounterError, StoreError};
use window_counter::ratelimit::{
    ClientIdKeyBuilder, ClientRequestIdentity, CounterStore, ManualClock, RateLimitOptions,
    RateLimitRule, WindowCounter,
};
use window_counter::store::MemoryStore;

/// Records how many increments reach the store.
#[derive(Default)]
struct SpyStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

impl SpyStore {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for SpyStore {
    async fn increment(&self, key: &str, delta: f64, timeout: Duration) -> Result<f64, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.increment(key, delta, timeout).await
    }

    fn store_type(&self) -> &'static str {
        "spy"
    }
}

/// Never answers within a reasonable time.
struct SlowStore;

#[async_trait]
impl CounterStore for SlowStore {
    async fn increment(&self, _: &str, _: f64, _: Duration) -> Result<f64, StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(0.0)
    }

    fn store_type(&self) -> &'static str {
        "slow"
    }
}

fn identity() -> ClientRequestIdentity {
    ClientRequestIdentity {
        client_ip: "192.168.1.10".to_string(),
        client_id: "client-a".to_string(),
        http_verb: "get".to_string(),
        path: "/api/values".to_string(),
    }
}

#[tokio::test]
async fn test_window_start_aligned_to_period() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 47).unwrap()));
    let counter = WindowCounter::new(MemoryStore::new()).with_clock(clock.clone());

    let result = counter.increment("key", Duration::from_secs(60), None).await.unwrap();
    assert_eq!(result.window_start, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());

    clock.advance(Duration::from_secs(20));
    let result = counter.increment("key", Duration::from_secs(60), None).await.unwrap();
    assert_eq!(result.window_start, Utc.with_ymd_and_hms(2024, 3, 1, 12, 1, 0).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_expiry_set_once_per_window() {
    let counter = WindowCounter::new(MemoryStore::new());
    let period = Duration::from_secs(10);

    counter.increment("key", period, None).await.unwrap();
    assert_eq!(counter.store().ttl("key"), Some(Duration::from_secs(10)));

    tokio::time::advance(Duration::from_secs(3)).await;
    let result = counter.increment("key", period, None).await.unwrap();

    assert_eq!(result.count, 2.0);
    assert_eq!(counter.store().ttl("key"), Some(Duration::from_secs(7)));
}

#[tokio::test(start_paused = true)]
async fn test_fresh_window_after_expiry() {
    let counter = WindowCounter::new(MemoryStore::new());
    let period = Duration::from_secs(10);

    let first = counter.increment("key", period, None).await.unwrap();
    assert_eq!(first.count, 1.0);

    tokio::time::advance(period).await;

    let second = counter.increment("key", period, None).await.unwrap();
    assert_eq!(second.count, 1.0);
}

#[tokio::test]
async fn test_weighted_increments() {
    let counter = WindowCounter::new(MemoryStore::new());
    let weight = || 2.5;

    let mut counts = Vec::new();
    for _ in 0..3 {
        let result = counter
            .increment("key", Duration::from_secs(60), Some(&weight))
            .await
            .unwrap();
        counts.push(result.count);
    }

    assert_eq!(counts, vec![2.5, 5.0, 7.5]);
}

#[tokio::test]
async fn test_missing_period_performs_no_store_operations() {
    let counter = WindowCounter::new(SpyStore::default());
    let rule = RateLimitRule::new("", 100.0);

    let result = counter
        .process_request(
            &identity(),
            &rule,
            &ClientIdKeyBuilder,
            &RateLimitOptions::default(),
            std::future::pending(),
        )
        .await;

    assert!(matches!(result, Err(CounterError::Validation(_))));
    assert_eq!(counter.store().calls(), 0);
}

#[tokio::test]
async fn test_zero_period_performs_no_store_operations() {
    let counter = WindowCounter::new(SpyStore::default());
    let rule = RateLimitRule::with_timespan(Duration::ZERO, 100.0);

    let result = counter
        .process_request(
            &identity(),
            &rule,
            &ClientIdKeyBuilder,
            &RateLimitOptions::default(),
            std::future::pending(),
        )
        .await;

    assert!(matches!(result, Err(CounterError::Validation(_))));
    assert_eq!(counter.store().calls(), 0);
}

#[tokio::test]
async fn test_anonymous_identity_performs_no_store_operations() {
    let counter = WindowCounter::new(SpyStore::default());
    let rule = RateLimitRule::new("1m", 100.0);

    let result = counter
        .process_request(
            &ClientRequestIdentity::default(),
            &rule,
            &ClientIdKeyBuilder,
            &RateLimitOptions::default(),
            std::future::pending(),
        )
        .await;

    assert!(matches!(result, Err(CounterError::Validation(_))));
    assert_eq!(counter.store().calls(), 0);
}

#[tokio::test]
async fn test_process_request_counts_per_client() {
    let counter = WindowCounter::new(SpyStore::default());
    let rule = RateLimitRule::new("1m", 100.0);
    let options = RateLimitOptions::default();
    let other = ClientRequestIdentity {
        client_id: "client-b".to_string(),
        ..identity()
    };

    for _ in 0..3 {
        counter
            .process_request(
                &identity(),
                &rule,
                &ClientIdKeyBuilder,
                &options,
                std::future::pending(),
            )
            .await
            .unwrap();
    }
    let result = counter
        .process_request(&other, &rule, &ClientIdKeyBuilder, &options, std::future::pending())
        .await
        .unwrap();

    assert_eq!(result.count, 1.0);
    assert_eq!(counter.store().calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_round_trip() {
    let counter = WindowCounter::new(SlowStore);
    let rule = RateLimitRule::new("1m", 100.0);

    let result = counter
        .process_request(
            &identity(),
            &rule,
            &ClientIdKeyBuilder,
            &RateLimitOptions::default(),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await;

    assert!(matches!(result, Err(CounterError::Cancelled)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_not_lost() {
    let counter = Arc::new(WindowCounter::new(MemoryStore::new()));
    let mut handles = Vec::new();

    for _ in 0..200 {
        let counter = counter.clone();
        handles.push(tokio::spawn(async move {
            counter.increment("shared", Duration::from_secs(60), None).await
        }));
    }

    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    assert_eq!(counter.store().get("shared"), Some(200.0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_weighted_increments_sum_exactly(
        quarters in prop::collection::vec(1u32..16, 1..64),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        let deltas: Vec<f64> = quarters.iter().map(|q| *q as f64 * 0.25).collect();
        let expected: f64 = deltas.iter().sum();

        let total = runtime.block_on(async {
            let counter = Arc::new(WindowCounter::new(MemoryStore::new()));
            let handles: Vec<_> = deltas
                .into_iter()
                .map(|delta| {
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        let weight = move || delta;
                        counter.increment("shared", Duration::from_secs(60), Some(&weight)).await
                    })
                })
                .collect();

            for result in futures::future::join_all(handles).await {
                result.unwrap().unwrap();
            }
            counter.store().get("shared")
        });

        prop_assert_eq!(total, Some(expected));
    }
}
