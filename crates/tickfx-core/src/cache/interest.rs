use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Callers waiting on one shared production.
///
/// The production's token is cancelled once the last waiter detaches, so a
/// caller that stops waiting never aborts work other callers still need.
#[derive(Debug, Default)]
pub(crate) struct Interest {
    waiting: Mutex<usize>,
    cancel: CancellationToken,
}

impl Interest {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Token handed to the producer.
    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Registers a waiter. Fails once every previous waiter has left.
    pub(crate) fn attach(self: &Arc<Self>) -> Option<InterestGuard> {
        let mut waiting = self
            .waiting
            .lock()
            .expect("interest counter should not be poisoned");
        if self.cancel.is_cancelled() {
            return None;
        }
        *waiting += 1;
        Some(InterestGuard(Arc::clone(self)))
    }

    fn detach(&self) {
        let mut waiting = self
            .waiting
            .lock()
            .expect("interest counter should not be poisoned");
        *waiting = waiting.saturating_sub(1);
        if *waiting == 0 {
            self.cancel.cancel();
        }
    }
}

/// Detaches its waiter when dropped.
#[derive(Debug)]
pub(crate) struct InterestGuard(Arc<Interest>);

impl Drop for InterestGuard {
    fn drop(&mut self) {
        self.0.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancels_only_after_last_waiter_leaves() {
        let interest = Interest::new();
        let first = interest.attach().expect("attach");
        let second = interest.attach().expect("attach");

        drop(first);
        assert!(!interest.token().is_cancelled());

        drop(second);
        assert!(interest.token().is_cancelled());
        assert!(interest.attach().is_none());
    }
}
