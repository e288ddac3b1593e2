//! `CondvarNotifier` — portable in-process `Notifier`.
//!
//! Counts notifications and wakes threads blocked in `wait_past()`.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use slotring_core::error::Result;
use slotring_core::notifier::Notifier;

#[derive(Default)]
pub struct CondvarNotifier {
    count: Mutex<u64>,
    cv: Condvar,
}

impl CondvarNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications so far.
    pub fn count(&self) -> u64 {
        *self.lock()
    }

    /// Block until the count exceeds `seen` or `timeout` passes.
    /// Returns the count observed last.
    pub fn wait_past(&self, seen: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock();
        while *count <= seen {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            count = self
                .cv
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *count
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Notifier for CondvarNotifier {
    fn notify(&self) -> Result<()> {
        *self.lock() += 1;
        self.cv.notify_all();
        Ok(())
    }
}
