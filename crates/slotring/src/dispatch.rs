//! `DispatchTable` — the receive handler slot for one ring index.
//!
//! The datapath calls `dispatch()` for every arriving frame; interception
//! swaps the handler with `exchange()`. A dispatch runs entirely against
//! the handler it loaded, and `exchange()` returns the previous handler
//! only once no dispatch that may have loaded it is still running. A
//! frame is never split between two handlers, and a handler is never
//! dropped under a running dispatch.
//!
//! # Protocol
//!
//! Readers register in one of two counters chosen by the parity of a
//! generation number; a writer flips the generation after the swap and
//! waits only for the counter of the generation it retired.
//!
//! ```text
//!   dispatch:  g = gen ; readers[g&1] += 1 ; (gen still g?) ; p = active
//!              p.handle() ; readers[g&1] -= 1
//!   exchange:  old = swap(active, new) ; g = gen++ ; wait readers[g&1] == 0
//! ```
//!
//! Readers arriving after the flip count against the other parity, so a
//! steady stream of frames cannot hold a writer off.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use slotring_core::steering::{RxHandler, RxVerdict};

type Handler = Arc<dyn RxHandler>;

pub struct DispatchTable {
    active: AtomicPtr<Handler>,
    gen: AtomicUsize,
    readers: [AtomicUsize; 2],
    /// Serializes writers.
    writer: Mutex<()>,
    /// Frames seen with no handler installed.
    unhandled: AtomicU64,
}

// Safety: `active` points at a heap `Arc<dyn RxHandler>` (Send + Sync),
// freed only after the reader grace period.
unsafe impl Send for DispatchTable {}
unsafe impl Sync for DispatchTable {}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DispatchTable {
    pub fn new(initial: Option<Handler>) -> Self {
        Self {
            active: AtomicPtr::new(into_raw(initial)),
            gen: AtomicUsize::new(0),
            readers: [AtomicUsize::new(0), AtomicUsize::new(0)],
            writer: Mutex::new(()),
            unhandled: AtomicU64::new(0),
        }
    }

    /// Deliver one frame to the active handler. `Pass` when none is
    /// installed.
    pub fn dispatch(&self, queue: u16, frame: &[u8]) -> RxVerdict {
        let slot = loop {
            let g = self.gen.load(Ordering::SeqCst);
            let slot = &self.readers[g & 1];
            slot.fetch_add(1, Ordering::SeqCst);
            if self.gen.load(Ordering::SeqCst) == g {
                break slot;
            }
            slot.fetch_sub(1, Ordering::SeqCst);
        };
        let p = self.active.load(Ordering::SeqCst);
        let verdict = if p.is_null() {
            self.unhandled.fetch_add(1, Ordering::Relaxed);
            RxVerdict::Pass
        } else {
            // Safety: `p` stays allocated while our generation is counted.
            unsafe { (*p).handle(queue, frame) }
        };
        slot.fetch_sub(1, Ordering::SeqCst);
        verdict
    }

    /// Install `new` and return the handler it replaced, after every
    /// dispatch that could still be using it has returned.
    pub fn exchange(&self, new: Option<Handler>) -> Option<Handler> {
        let _w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let old = self.active.swap(into_raw(new), Ordering::SeqCst);
        let g = self.gen.fetch_add(1, Ordering::SeqCst);
        while self.readers[g & 1].load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }
        from_raw(old)
    }

    /// True if a handler is installed.
    pub fn is_active(&self) -> bool {
        !self.active.load(Ordering::SeqCst).is_null()
    }

    pub fn unhandled(&self) -> u64 {
        self.unhandled.load(Ordering::Relaxed)
    }
}

impl Drop for DispatchTable {
    fn drop(&mut self) {
        let p = std::mem::replace(self.active.get_mut(), ptr::null_mut());
        drop(from_raw(p));
    }
}

fn into_raw(h: Option<Handler>) -> *mut Handler {
    match h {
        Some(h) => Box::into_raw(Box::new(h)),
        None => ptr::null_mut(),
    }
}

fn from_raw(p: *mut Handler) -> Option<Handler> {
    if p.is_null() {
        None
    } else {
        // Safety: produced by `into_raw` and unreachable from `active`.
        Some(*unsafe { Box::from_raw(p) })
    }
}
