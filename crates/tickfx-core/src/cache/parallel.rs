use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::interest::{Interest, InterestGuard};
use crate::source::{SourceError, SourceFuture};

/// Produces the value of a single key.
pub trait KeyProducer<K, V>: Send + Sync {
    fn produce_one<'a>(&'a self, key: K, cancel: CancellationToken) -> SourceFuture<'a, V>;
}

type SlotHandle<V> = Shared<BoxFuture<'static, Result<V, SourceError>>>;

struct Slot<V> {
    id: u64,
    handle: SlotHandle<V>,
    interest: Arc<Interest>,
    /// Completion time once produced; scheduling time while in flight.
    inserted_at: Instant,
}

struct ParallelInner<K, V> {
    name: &'static str,
    producer: Arc<dyn KeyProducer<K, V>>,
    ttl: Duration,
    slots: Mutex<HashMap<K, Slot<V>>>,
    next_id: AtomicU64,
}

/// Per-key cache where each key is produced independently.
///
/// Concurrent lookups of one key share a single in-flight production while
/// distinct keys are produced in parallel. Failed productions are never
/// stored, so the next lookup retries.
pub struct ParallelProducerCache<K, V> {
    inner: Arc<ParallelInner<K, V>>,
}

impl<K, V> Clone for ParallelProducerCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ParallelProducerCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, producer: Arc<dyn KeyProducer<K, V>>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(ParallelInner {
                name,
                producer,
                ttl,
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.ttl.is_zero()
    }

    pub async fn get(&self, key: &K, cancel: &CancellationToken) -> Result<V, SourceError> {
        let (handle, _guard) = self.attach(key);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SourceError::cancelled(format!(
                "{} request cancelled while waiting for production",
                self.inner.name
            ))),
            output = handle => output,
        }
    }

    /// Looks up every key concurrently; fails on the first failing key.
    pub async fn get_many(
        &self,
        keys: &HashSet<K>,
        cancel: &CancellationToken,
    ) -> Result<HashMap<K, V>, SourceError> {
        let lookups = keys.iter().map(|key| async move {
            self.get(key, cancel)
                .await
                .map(|value| (key.clone(), value))
        });
        Ok(try_join_all(lookups).await?.into_iter().collect())
    }

    /// Fresh produced value for `key`, without triggering production.
    pub fn peek(&self, key: &K) -> Option<V> {
        let slots = self.inner.lock_slots();
        let slot = slots.get(key)?;
        match slot.handle.peek() {
            Some(Ok(value)) if slot.inserted_at.elapsed() <= self.inner.ttl => Some(value.clone()),
            _ => None,
        }
    }

    /// Number of slots, in flight or produced, including expired ones.
    pub fn len(&self) -> usize {
        self.inner.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.inner
            .lock_slots()
            .values()
            .filter(|slot| slot.handle.peek().is_none())
            .count()
    }

    /// Drops produced values. Productions in flight keep running.
    pub fn clear(&self) {
        self.inner
            .lock_slots()
            .retain(|_, slot| slot.handle.peek().is_none());
    }

    pub fn clear_expired(&self) {
        let ttl = self.inner.ttl;
        self.inner
            .lock_slots()
            .retain(|_, slot| slot.handle.peek().is_none() || slot.inserted_at.elapsed() <= ttl);
    }

    fn attach(&self, key: &K) -> (SlotHandle<V>, Option<InterestGuard>) {
        let mut slots = self.inner.lock_slots();

        if let Some(slot) = slots.get(key) {
            match slot.handle.peek() {
                None => {
                    if let Some(guard) = slot.interest.attach() {
                        return (slot.handle.clone(), Some(guard));
                    }
                }
                Some(Ok(_)) if slot.inserted_at.elapsed() <= self.inner.ttl => {
                    return (slot.handle.clone(), None);
                }
                Some(_) => {}
            }
        }

        let slot = self.schedule(key.clone());
        let guard = slot
            .interest
            .attach()
            .expect("a freshly scheduled production accepts waiters");
        let handle = slot.handle.clone();
        slots.insert(key.clone(), slot);
        (handle, Some(guard))
    }

    fn schedule(&self, key: K) -> Slot<V> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let interest = Interest::new();

        let inner = Arc::clone(&self.inner);
        let cancel = interest.token();
        let task = tokio::spawn(async move { inner.produce(id, key, cancel).await });
        let handle = async move {
            task.await.unwrap_or_else(|error| {
                Err(SourceError::internal(format!(
                    "production did not complete: {error}"
                )))
            })
        }
        .boxed()
        .shared();

        Slot {
            id,
            handle,
            interest,
            inserted_at: Instant::now(),
        }
    }
}

impl<K, V> ParallelInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.slots
            .lock()
            .expect("cache slots should not be poisoned")
    }

    async fn produce(&self, id: u64, key: K, cancel: CancellationToken) -> Result<V, SourceError> {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SourceError::cancelled(
                "every caller stopped waiting for production",
            )),
            result = self.producer.produce_one(key.clone(), cancel.clone()) => result,
        };

        let mut slots = self.lock_slots();
        let owns_slot = slots.get(&key).map(|slot| slot.id) == Some(id);
        match (&result, owns_slot) {
            (Ok(_), true) if !self.ttl.is_zero() => {
                if let Some(slot) = slots.get_mut(&key) {
                    slot.inserted_at = Instant::now();
                }
            }
            (_, true) => {
                slots.remove(&key);
            }
            (_, false) => {}
        }
        drop(slots);

        match &result {
            Ok(_) => debug!(
                cache = self.name,
                production = id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "production completed"
            ),
            Err(error) => warn!(cache = self.name, production = id, %error, "production failed"),
        }
        result
    }
}
