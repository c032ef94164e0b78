//! In-memory caches that coalesce concurrent production.
//!
//! | Cache | Coalescing granularity | Production |
//! |-------|------------------------|------------|
//! | [`CoalescingCache`] | whole request: any miss sends every requested key to the next round | one batched round in flight at a time |
//! | [`ParallelProducerCache`] | single key | one production per key, distinct keys in parallel |
//!
//! Both caches expire entries lazily: an entry older than the TTL is simply
//! ignored on lookup. A TTL of zero disables storage but keeps coalescing of
//! concurrent callers.

mod interest;
mod parallel;
#[cfg(test)]
mod test_support;

pub use parallel::{KeyProducer, ParallelProducerCache};

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::source::{SourceError, SourceFuture};
use interest::{Interest, InterestGuard};

/// Produces values for a batch of keys in one call.
///
/// Implementations must return an entry for every requested key or fail the
/// whole call; silently omitting a key fails the round as incomplete.
pub trait BatchProducer<K, V>: Send + Sync {
    fn produce<'a>(
        &'a self,
        keys: HashSet<K>,
        cancel: CancellationToken,
    ) -> SourceFuture<'a, HashMap<K, V>>;
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() <= ttl
    }
}

type RoundOutput<K, V> = Result<Arc<HashMap<K, V>>, SourceError>;
type RoundHandle<K, V> = Shared<BoxFuture<'static, RoundOutput<K, V>>>;

/// A production round that has been scheduled but has not drained the
/// pending buffer yet. Every caller that buffers keys joins it.
#[derive(Clone)]
struct Round<K, V> {
    id: u64,
    handle: RoundHandle<K, V>,
    interest: Arc<Interest>,
}

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    pending: HashSet<K>,
    next_round: Option<Round<K, V>>,
    rounds_started: u64,
}

struct CacheInner<K, V> {
    name: &'static str,
    producer: Arc<dyn BatchProducer<K, V>>,
    ttl: Duration,
    state: Mutex<CacheState<K, V>>,
    /// Held for the whole of a production round.
    gate: tokio::sync::Mutex<()>,
}

/// Batch cache that serves a request entirely from cache or entirely from
/// one production round, so a caller never sees values of mixed vintage.
///
/// Concurrent callers with cache misses are merged: their keys accumulate in
/// a pending buffer that the next round drains in full, and a single producer
/// call serves all of them. At most one round runs at a time.
pub struct CoalescingCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for CoalescingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> CoalescingCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, producer: Arc<dyn BatchProducer<K, V>>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                name,
                producer,
                ttl,
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    pending: HashSet::new(),
                    next_round: None,
                    rounds_started: 0,
                }),
                gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Cache that never stores values but still coalesces concurrent callers.
    pub fn disabled(name: &'static str, producer: Arc<dyn BatchProducer<K, V>>) -> Self {
        Self::new(name, producer, Duration::ZERO)
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.ttl.is_zero()
    }

    /// Values for every key in `keys`.
    ///
    /// Cancelling `cancel` only stops this caller from waiting. The shared
    /// production is cancelled once no caller is waiting for it any more.
    pub async fn get(
        &self,
        keys: &HashSet<K>,
        cancel: &CancellationToken,
    ) -> Result<HashMap<K, V>, SourceError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        if let Some(hit) = self.inner.fresh(keys) {
            debug!(cache = self.inner.name, keys = keys.len(), "served from cache");
            return Ok(hit);
        }

        let (handle, _guard) = self.enqueue(keys);
        let produced = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SourceError::cancelled(format!(
                    "{} request cancelled while waiting for production",
                    self.inner.name
                )));
            }
            output = handle => output?,
        };

        keys.iter()
            .map(|key| {
                produced
                    .get(key)
                    .map(|value| (key.clone(), value.clone()))
                    .ok_or_else(|| {
                        SourceError::incomplete(format!(
                            "{} round finished without a requested key",
                            self.inner.name
                        ))
                    })
            })
            .collect()
    }

    pub async fn get_one(&self, key: K, cancel: &CancellationToken) -> Result<V, SourceError> {
        let keys = HashSet::from([key.clone()]);
        let mut values = self.get(&keys, cancel).await?;
        values.remove(&key).ok_or_else(|| {
            SourceError::incomplete(format!("{} returned no value for the key", self.inner.name))
        })
    }

    /// Fresh cached value for `key`, without triggering production.
    pub fn peek(&self, key: &K) -> Option<V> {
        let state = self.inner.lock_state();
        state
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(self.inner.ttl))
            .map(|entry| entry.value.clone())
    }

    /// Number of stored entries, including expired ones.
    pub fn len(&self) -> usize {
        self.inner.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys buffered for the next production round.
    pub fn pending_len(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn clear(&self) {
        self.inner.lock_state().entries.clear();
    }

    pub fn clear_expired(&self) {
        let ttl = self.inner.ttl;
        self.inner
            .lock_state()
            .entries
            .retain(|_, entry| entry.is_fresh(ttl));
    }

    /// Buffers `keys` and joins the next round, scheduling one if needed.
    fn enqueue(&self, keys: &HashSet<K>) -> (RoundHandle<K, V>, InterestGuard) {
        let mut state = self.inner.lock_state();
        state.pending.extend(keys.iter().cloned());

        if let Some(round) = &state.next_round {
            if let Some(guard) = round.interest.attach() {
                debug!(
                    cache = self.inner.name,
                    round = round.id,
                    keys = keys.len(),
                    "joined scheduled production round"
                );
                return (round.handle.clone(), guard);
            }
        }

        let round = self.schedule_round(&mut state);
        let guard = round
            .interest
            .attach()
            .expect("a freshly scheduled round accepts waiters");
        let handle = round.handle.clone();
        state.next_round = Some(round);
        (handle, guard)
    }

    fn schedule_round(&self, state: &mut CacheState<K, V>) -> Round<K, V> {
        state.rounds_started += 1;
        let id = state.rounds_started;
        let interest = Interest::new();
        let scheduled_at = Instant::now();

        // The round runs on its own task so that no single caller going away
        // can abort it.
        let inner = Arc::clone(&self.inner);
        let cancel = interest.token();
        let task = tokio::spawn(async move { inner.run_round(id, scheduled_at, cancel).await });
        let handle = async move {
            task.await.unwrap_or_else(|error| {
                Err(SourceError::internal(format!(
                    "production round did not complete: {error}"
                )))
            })
        }
        .boxed()
        .shared();

        debug!(cache = self.inner.name, round = id, "scheduled production round");
        Round {
            id,
            handle,
            interest,
        }
    }
}

impl<K, V> CacheInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state
            .lock()
            .expect("cache state should not be poisoned")
    }

    fn fresh(&self, keys: &HashSet<K>) -> Option<HashMap<K, V>> {
        if self.ttl.is_zero() {
            return None;
        }

        let state = self.lock_state();
        keys.iter()
            .map(|key| {
                state
                    .entries
                    .get(key)
                    .filter(|entry| entry.is_fresh(self.ttl))
                    .map(|entry| (key.clone(), entry.value.clone()))
            })
            .collect()
    }

    async fn run_round(
        &self,
        id: u64,
        scheduled_at: Instant,
        cancel: CancellationToken,
    ) -> RoundOutput<K, V> {
        let _gate = self.gate.lock().await;

        let keys = {
            let mut state = self.lock_state();
            let is_current = state.next_round.as_ref().map(|round| round.id) == Some(id);
            if !is_current {
                return Err(SourceError::cancelled(
                    "production round was abandoned before it started",
                ));
            }
            state.next_round = None;
            let keys = std::mem::take(&mut state.pending);

            // A round that finished while this one waited on the gate may
            // already have produced everything that was asked for.
            if let Some(reused) = produced_since(&state.entries, &keys, scheduled_at, self.ttl) {
                debug!(cache = self.name, round = id, keys = keys.len(), "round satisfied by previous round");
                return Ok(Arc::new(reused));
            }
            keys
        };

        if cancel.is_cancelled() {
            return Err(SourceError::cancelled(
                "every caller stopped waiting before production started",
            ));
        }

        let requested = keys.len();
        let started = Instant::now();
        let produced = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SourceError::cancelled(
                "every caller stopped waiting for production",
            )),
            result = self.producer.produce(keys.clone(), cancel.clone()) => result,
        };

        let values = match produced {
            Ok(values) => values,
            Err(error) => {
                warn!(cache = self.name, round = id, keys = requested, %error, "production round failed");
                return Err(error);
            }
        };

        let missing = keys.iter().filter(|key| !values.contains_key(*key)).count();
        if missing > 0 {
            let error = SourceError::incomplete(format!(
                "producer omitted {missing} of {requested} requested keys"
            ));
            warn!(cache = self.name, round = id, %error, "production round rejected");
            return Err(error);
        }

        if !self.ttl.is_zero() {
            let inserted_at = Instant::now();
            let mut state = self.lock_state();
            for (key, value) in &values {
                state.entries.insert(
                    key.clone(),
                    CacheEntry {
                        value: value.clone(),
                        inserted_at,
                    },
                );
            }
        }

        info!(
            cache = self.name,
            round = id,
            keys = requested,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "production round completed"
        );
        Ok(Arc::new(values))
    }
}

/// Values for all of `keys` stored at or after `since`, if every key has one.
fn produced_since<K, V>(
    entries: &HashMap<K, CacheEntry<V>>,
    keys: &HashSet<K>,
    since: Instant,
    ttl: Duration,
) -> Option<HashMap<K, V>>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    if ttl.is_zero() || keys.is_empty() {
        return None;
    }

    keys.iter()
        .map(|key| {
            entries
                .get(key)
                .filter(|entry| entry.inserted_at >= since && entry.is_fresh(ttl))
                .map(|entry| (key.clone(), entry.value.clone()))
        })
        .collect()
}
