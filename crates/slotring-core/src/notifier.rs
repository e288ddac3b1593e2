//! "New work available" notification.
//!
//! # Implementors
//!
//! - `EventFdNotifier` (default on Linux): writes 1 to an eventfd.
//! - `CondvarNotifier`: bumps a counter and wakes condvar waiters.
//!   Portable, and what the tests observe.

use crate::error::Result;

/// Wakes whichever side waits for ring activity.
///
/// **Contract:**
/// - `notify()` must NEVER block.
/// - Multiple calls before the waiter wakes may be coalesced.
pub trait Notifier: Send + Sync {
    fn notify(&self) -> Result<()>;
}

impl<N: Notifier + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self) -> Result<()> {
        (**self).notify()
    }
}
