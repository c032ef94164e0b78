use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{BatchProducer, KeyProducer};
use crate::source::{SourceError, SourceFuture};

pub(super) fn keys(values: &[&'static str]) -> HashSet<&'static str> {
    values.iter().copied().collect()
}

pub(super) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition should be reached in time");
}

/// Producer whose calls block until the test releases permits.
///
/// Values are `"{key}@{call}"`, where `call` counts producer invocations from 1.
pub(super) struct GatedProducer {
    gate: Semaphore,
    batches: Mutex<Vec<HashSet<&'static str>>>,
    tokens: Mutex<Vec<CancellationToken>>,
    failing: Mutex<HashSet<usize>>,
    omitted: Mutex<HashSet<&'static str>>,
}

impl GatedProducer {
    pub(super) fn open() -> Arc<Self> {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    pub(super) fn closed() -> Arc<Self> {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(permits),
            batches: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            omitted: Mutex::new(HashSet::new()),
        })
    }

    pub(super) fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    pub(super) fn fail_call(&self, call: usize) {
        self.failing.lock().expect("lock").insert(call);
    }

    pub(super) fn omit(&self, key: &'static str) {
        self.omitted.lock().expect("lock").insert(key);
    }

    pub(super) fn calls(&self) -> usize {
        self.batches.lock().expect("lock").len()
    }

    pub(super) fn batches(&self) -> Vec<HashSet<&'static str>> {
        self.batches.lock().expect("lock").clone()
    }

    /// Calls whose cancellation token has fired.
    pub(super) fn cancelled_calls(&self) -> usize {
        self.tokens
            .lock()
            .expect("lock")
            .iter()
            .filter(|token| token.is_cancelled())
            .count()
    }

    async fn run(
        &self,
        keys: HashSet<&'static str>,
        cancel: CancellationToken,
    ) -> Result<HashMap<&'static str, String>, SourceError> {
        let call = {
            let mut batches = self.batches.lock().expect("lock");
            batches.push(keys.clone());
            self.tokens.lock().expect("lock").push(cancel.clone());
            batches.len()
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::cancelled("test producer cancelled")),
            permit = self.gate.acquire() => {
                permit
                    .map_err(|_| SourceError::internal("test gate closed"))?
                    .forget();
            }
        }

        if self.failing.lock().expect("lock").contains(&call) {
            return Err(SourceError::unavailable(format!("call {call} failed")));
        }

        let omitted = self.omitted.lock().expect("lock").clone();
        Ok(keys
            .into_iter()
            .filter(|key| !omitted.contains(key))
            .map(|key| (key, format!("{key}@{call}")))
            .collect())
    }
}

impl BatchProducer<&'static str, String> for GatedProducer {
    fn produce<'a>(
        &'a self,
        keys: HashSet<&'static str>,
        cancel: CancellationToken,
    ) -> SourceFuture<'a, HashMap<&'static str, String>> {
        Box::pin(self.run(keys, cancel))
    }
}

impl KeyProducer<&'static str, String> for GatedProducer {
    fn produce_one<'a>(
        &'a self,
        key: &'static str,
        cancel: CancellationToken,
    ) -> SourceFuture<'a, String> {
        Box::pin(async move {
            let mut values = self.run(HashSet::from([key]), cancel).await?;
            values
                .remove(key)
                .ok_or_else(|| SourceError::incomplete(format!("no value for {key}")))
        })
    }
}
