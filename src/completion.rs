use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A reference-counted countdown barrier.
///
/// Producers register units with [`add`](Self::add) before handing work to
/// another task, consumers signal with [`done`](Self::done), and
/// [`wait`](Self::wait) suspends until the count returns to zero.
/// Registration must happen before submission so a completion can never
/// race ahead of the waiter.
#[derive(Clone, Debug, Default)]
pub struct CompletionGroup {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    pending: AtomicUsize,
    notify: Notify,
}

impl CompletionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n` outstanding units.
    pub fn add(&self, n: usize) {
        self.inner.pending.fetch_add(n, Ordering::AcqRel);
    }

    /// Signal one unit as complete. Must be balanced by a prior `add`.
    pub fn done(&self) {
        let prev = self.inner.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "done() without a matching add()");
        if prev == 1 {
            self.inner.notify.notify_waiters();
        }
    }

    /// Number of units still outstanding.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Suspend until every registered unit has signaled.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register for the wakeup before checking the count, otherwise
            // a done() landing in between is lost.
            notified.as_mut().enable();
            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}
