// ── Level-triggered wake ──
//
// A settable/clearable flag with async wait. Any number of `set()` calls
// before the loop gets to run collapse into a single wake-up.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub(crate) struct WakeSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl WakeSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Request an attempt. Idempotent while pending.
    pub(crate) fn set(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Wait until the flag is set, then clear it.
    pub(crate) async fn wait_and_clear(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent `set()`
            // cannot slip between the check and the await.
            notified.as_mut().enable();
            if self.flag.swap(false, Ordering::AcqRel) {
                return;
            }
            notified.await;
        }
    }
}
