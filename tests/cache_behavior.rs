//! Behavior-driven tests for the history caches.
//!
//! These tests exercise request coalescing through the public cache API and
//! through the normalization engine, counting how often the producer runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tickfx_core::{
    BatchProducer, CoalescingCache, EngineConfig, KeyProducer, NormalizationEngine,
    NormalizeRequest, ParallelProducerCache, PricePoint, SecurityHistory, SecuritySnapshot,
    Series, SourceError, SourceErrorKind, SourceFuture, StaticHistorySource, Symbol, UtcDateTime,
};
use tokio_util::sync::CancellationToken;

/// Squares its keys after an optional delay and records every batch.
#[derive(Default)]
struct Squares {
    delay: Option<Duration>,
    calls: AtomicUsize,
    batches: Mutex<Vec<Vec<u32>>>,
    failing: Mutex<bool>,
}

impl Squares {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn batches(&self) -> Vec<Vec<u32>> {
        self.batches.lock().expect("batches lock").clone()
    }

    fn set_failing(&self, failing: bool) {
        *self.failing.lock().expect("failing lock") = failing;
    }

    async fn square(&self, mut keys: Vec<u32>) -> Result<HashMap<u32, u64>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        keys.sort_unstable();
        self.batches.lock().expect("batches lock").push(keys.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if *self.failing.lock().expect("failing lock") {
            return Err(SourceError::unavailable("squares are down"));
        }
        Ok(keys
            .into_iter()
            .map(|key| (key, u64::from(key) * u64::from(key)))
            .collect())
    }
}

impl BatchProducer<u32, u64> for Squares {
    fn produce<'a>(
        &'a self,
        keys: HashSet<u32>,
        _cancel: CancellationToken,
    ) -> SourceFuture<'a, HashMap<u32, u64>> {
        Box::pin(self.square(keys.into_iter().collect()))
    }
}

impl KeyProducer<u32, u64> for Squares {
    fn produce_one<'a>(&'a self, key: u32, _cancel: CancellationToken) -> SourceFuture<'a, u64> {
        Box::pin(async move {
            let mut values = self.square(vec![key]).await?;
            values
                .remove(&key)
                .ok_or_else(|| SourceError::incomplete("square missing"))
        })
    }
}

fn keys(values: &[u32]) -> HashSet<u32> {
    values.iter().copied().collect()
}

// =============================================================================
// Coalescing cache
// =============================================================================

#[tokio::test]
async fn when_second_request_is_a_subset_producer_runs_once() {
    // Given: a cache with a long lifetime
    let producer = Arc::new(Squares::default());
    let cache: CoalescingCache<u32, u64> = CoalescingCache::new("squares", producer.clone(), Duration::from_secs(60));
    let cancel = CancellationToken::new();

    // When: {1, 2, 3} is requested, then {2, 3}
    let first = cache.get(&keys(&[1, 2, 3]), &cancel).await.expect("first");
    let second = cache.get(&keys(&[2, 3]), &cancel).await.expect("second");

    // Then: the second request is served from the first production
    assert_eq!(producer.calls(), 1);
    assert_eq!(first[&3], 9);
    assert_eq!(second, HashMap::from([(2, 4), (3, 9)]));
}

#[tokio::test]
async fn when_request_partially_hits_whole_key_set_is_produced_again() {
    // Given: a warm cache holding 1 and 2
    let producer = Arc::new(Squares::default());
    let cache: CoalescingCache<u32, u64> = CoalescingCache::new("squares", producer.clone(), Duration::from_secs(60));
    let cancel = CancellationToken::new();

    cache.get(&keys(&[1, 2]), &cancel).await.expect("warm");
    let values = cache.get(&keys(&[2, 5]), &cancel).await.expect("partial hit");

    // Then: no caller sees values from two production vintages
    assert_eq!(values, HashMap::from([(2, 4), (5, 25)]));
    assert_eq!(producer.batches(), vec![vec![1, 2], vec![2, 5]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn when_identical_requests_race_they_share_one_production() {
    // Given: a slow producer
    let producer = Arc::new(Squares::slow(Duration::from_millis(50)));
    let cache: Arc<CoalescingCache<u32, u64>> = Arc::new(CoalescingCache::new(
        "squares",
        producer.clone(),
        Duration::from_secs(60),
    ));

    // When: eight callers ask for the same keys at once
    let requests = (0..8).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get(&keys(&[4, 7]), &CancellationToken::new()).await })
    });
    let results = futures::future::join_all(requests).await;

    // Then: every caller sees the same values from a single production
    for result in results {
        let values = result.expect("task").expect("values");
        assert_eq!(values, HashMap::from([(4, 16), (7, 49)]));
    }
    assert_eq!(producer.calls(), 1);
}

#[tokio::test]
async fn when_lifetime_is_zero_nothing_is_reused() {
    let producer = Arc::new(Squares::default());
    let cache: CoalescingCache<u32, u64> = CoalescingCache::disabled("squares", producer.clone());
    let cancel = CancellationToken::new();

    cache.get(&keys(&[3]), &cancel).await.expect("first");
    cache.get(&keys(&[3]), &cancel).await.expect("second");

    assert_eq!(producer.calls(), 2);
    assert!(cache.is_empty());
    assert_eq!(cache.peek(&3), None);
}

#[tokio::test]
async fn when_production_fails_error_is_returned_and_next_call_retries() {
    // Given: a producer that is currently failing
    let producer = Arc::new(Squares::default());
    producer.set_failing(true);
    let cache: CoalescingCache<u32, u64> = CoalescingCache::new("squares", producer.clone(), Duration::from_secs(60));
    let cancel = CancellationToken::new();

    // When: a request fails and the producer then recovers
    let error = cache.get(&keys(&[6]), &cancel).await.expect_err("failing producer");
    producer.set_failing(false);
    let value = cache.get_one(6, &cancel).await.expect("retry");

    // Then: the failure was not cached
    assert_eq!(error.kind(), SourceErrorKind::Unavailable);
    assert_eq!(value, 36);
    assert_eq!(producer.calls(), 2);
}

#[tokio::test]
async fn when_empty_key_set_is_requested_producer_is_not_called() {
    let producer = Arc::new(Squares::default());
    let cache: CoalescingCache<u32, u64> = CoalescingCache::new("squares", producer.clone(), Duration::from_secs(60));

    let values = cache
        .get(&HashSet::new(), &CancellationToken::new())
        .await
        .expect("empty request");

    assert!(values.is_empty());
    assert_eq!(producer.calls(), 0);
}

// =============================================================================
// Parallel producer cache
// =============================================================================

#[tokio::test]
async fn when_many_keys_are_requested_each_is_produced_separately() {
    let producer = Arc::new(Squares::default());
    let cache: ParallelProducerCache<u32, u64> = ParallelProducerCache::new("squares", producer.clone(), Duration::from_secs(60));

    let values = cache
        .get_many(&keys(&[2, 3]), &CancellationToken::new())
        .await
        .expect("values");

    assert_eq!(values, HashMap::from([(2, 4), (3, 9)]));
    let mut batches = producer.batches();
    batches.sort();
    assert_eq!(batches, vec![vec![2], vec![3]]);
    assert_eq!(cache.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn when_same_key_is_requested_concurrently_it_is_produced_once() {
    let producer = Arc::new(Squares::slow(Duration::from_millis(50)));
    let cache: Arc<ParallelProducerCache<u32, u64>> = Arc::new(ParallelProducerCache::new(
        "squares",
        producer.clone(),
        Duration::from_secs(60),
    ));

    let requests = (0..5).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get(&9, &CancellationToken::new()).await })
    });
    for result in futures::future::join_all(requests).await {
        assert_eq!(result.expect("task").expect("value"), 81);
    }

    assert_eq!(producer.calls(), 1);
}

// =============================================================================
// Engine-level caching
// =============================================================================

fn aapl() -> SecurityHistory {
    let start = UtcDateTime::parse("2024-01-02T21:00:00Z").expect("utc");
    let closes = Series::new(vec![
        PricePoint::new(start, 190.0, 10),
        PricePoint::new(start + time::Duration::days(1), 191.0, 12),
    ])
    .expect("ordered");
    let snapshot = SecuritySnapshot::new(
        Symbol::parse("AAPL").expect("valid"),
        Some(tickfx_core::Currency::pivot()),
    );
    SecurityHistory::new(snapshot, closes)
}

#[tokio::test]
async fn when_history_lifetime_is_zero_every_request_fetches() {
    let source = Arc::new(StaticHistorySource::new().with_history(aapl()));
    let config = EngineConfig::default().with_ttl(Duration::ZERO);
    let engine = NormalizationEngine::new(source.clone(), &config);
    let request = NormalizeRequest::parse(["AAPL"], None).expect("valid");

    engine.normalize(&request, &CancellationToken::new()).await.expect("first");
    engine.normalize(&request, &CancellationToken::new()).await.expect("second");

    assert_eq!(source.calls_for(&Symbol::parse("AAPL").expect("valid")), 2);
}

#[tokio::test]
async fn when_history_lifetime_is_long_repeated_requests_fetch_once() {
    let source = Arc::new(StaticHistorySource::new().with_history(aapl()));
    let engine = NormalizationEngine::new(source.clone(), &EngineConfig::default());
    let request = NormalizeRequest::parse(["AAPL"], None).expect("valid");

    for _ in 0..3 {
        engine.normalize(&request, &CancellationToken::new()).await.expect("batch");
    }

    assert_eq!(source.calls(), 1);
    assert!(engine.histories().peek(&Symbol::parse("AAPL").expect("valid")).is_some());
}
