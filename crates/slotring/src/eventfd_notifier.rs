//! `EventFdNotifier` — default `Notifier` on Linux.
//!
//! Each `notify()` adds 1 to an eventfd counter. Notifications raised
//! before the waiter reads the eventfd collapse into one wakeup.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::sys::eventfd::{EfdFlags, EventFd};

use slotring_core::error::{Result, RingError};
use slotring_core::notifier::Notifier;

pub struct EventFdNotifier {
    fd: EventFd,
}

impl EventFdNotifier {
    /// Create a non-blocking, close-on-exec eventfd. Closed on drop.
    pub fn create() -> Result<Self> {
        let fd = EventFd::from_flags(EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)
            .map_err(|e| RingError::Os(e as i32))?;
        Ok(Self { fd })
    }

    /// Descriptor for poll/epoll registration.
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Read and reset the counter. `Ok(0)` when nothing is pending.
    pub fn drain(&self) -> Result<u64> {
        match self.fd.read() {
            Ok(n) => Ok(n),
            Err(Errno::EAGAIN) => Ok(0),
            Err(e) => Err(RingError::Os(e as i32)),
        }
    }
}

impl AsFd for EventFdNotifier {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Notifier for EventFdNotifier {
    fn notify(&self) -> Result<()> {
        match self.fd.write(1) {
            Ok(_) => Ok(()),
            // Counter saturated: a wakeup is already pending.
            Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(RingError::Os(e as i32)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifications_coalesce() {
        let n = EventFdNotifier::create().unwrap();
        assert!(n.fd() >= 0);
        assert_eq!(n.drain().unwrap(), 0);
        n.notify().unwrap();
        n.notify().unwrap();
        n.notify().unwrap();
        assert_eq!(n.drain().unwrap(), 3);
        assert_eq!(n.drain().unwrap(), 0);
    }
}
