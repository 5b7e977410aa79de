use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot flag that tasks can await. Setting it is idempotent and wakes
/// every current and future waiter.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    is_set: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Sets the flag; returns whether this call was the one that set it.
    pub(crate) fn set(&self) -> bool {
        if self
            .is_set
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        self.is_set.load(Ordering::SeqCst)
    }

    /// Completes once the flag is set. Returns immediately when already set.
    pub(crate) async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register with the notifier before the final flag check so a set()
            // landing in between cannot be missed.
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}
