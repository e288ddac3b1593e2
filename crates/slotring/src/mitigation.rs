//! Receive notification mitigation.
//!
//! The first arrival after a quiet period notifies at once and arms a
//! timer. Arrivals while armed only set `pending`. On expiry a set
//! `pending` is turned into one notification and the timer re-arms; a
//! clear one lets the timer go idle.
//!
//! ```text
//!            arrival / notify + arm
//!   Idle ─────────────────────────────▶ Armed ──┐ arrival / pending = true
//!    ▲                                    │ ▲   │
//!    │      expiry, !pending              │ └───┘
//!    └────────────────────────────────────┤
//!                                         │ expiry, pending / notify + re-arm
//!                                         └──▶ Armed
//!
//!   any ── cancel ──▶ Cancelled (terminal)
//! ```
//!
//! `MitigationState` is the state machine alone; `MitigationTimer` drives
//! it with a dedicated thread and a `Notifier`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use slotring_core::error::{Result, RingError};
use slotring_core::notifier::Notifier;
use slotring_core::{kdebug, kwarn_rl};

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const CANCELLED: u8 = 2;

/// What the caller of `on_arrival` must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Notify now and arm the timer.
    Notify,
    /// Folded into the next expiry.
    Coalesced,
    Cancelled,
}

/// What the timer must do after an expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Notify and re-arm from now.
    Notify,
    /// Nothing pending; stay inactive.
    Idle,
    Cancelled,
}

/// Mitigation state machine.
///
/// `pending` is the only point where arrivals and expiries meet. All
/// accesses are SeqCst: the idle transition stores the state and then
/// re-reads `pending`, while an arrival stores `pending` and then re-reads
/// the state, so at least one side sees the other.
#[derive(Debug)]
pub struct MitigationState {
    state: AtomicU8,
    pending: AtomicBool,
}

impl Default for MitigationState {
    fn default() -> Self {
        Self::new()
    }
}

impl MitigationState {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            pending: AtomicBool::new(false),
        }
    }

    pub fn on_arrival(&self) -> Arrival {
        loop {
            match self
                .state
                .compare_exchange(IDLE, ARMED, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    self.pending.store(false, Ordering::SeqCst);
                    return Arrival::Notify;
                }
                Err(CANCELLED) => return Arrival::Cancelled,
                Err(_) => {
                    self.pending.store(true, Ordering::SeqCst);
                    match self.state.load(Ordering::SeqCst) {
                        // Went idle before the expiry saw `pending`.
                        IDLE => continue,
                        CANCELLED => return Arrival::Cancelled,
                        _ => return Arrival::Coalesced,
                    }
                }
            }
        }
    }

    pub fn on_expiry(&self) -> Expiry {
        match self.state.load(Ordering::SeqCst) {
            ARMED => {}
            CANCELLED => return Expiry::Cancelled,
            _ => return Expiry::Idle,
        }
        if self.pending.swap(false, Ordering::SeqCst) {
            return Expiry::Notify;
        }
        if self
            .state
            .compare_exchange(ARMED, IDLE, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Expiry::Cancelled;
        }
        // An arrival may have set `pending` after the swap and still seen
        // Armed. Take it back unless that arrival already did.
        if self.pending.load(Ordering::SeqCst)
            && self
                .state
                .compare_exchange(IDLE, ARMED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.pending.store(false, Ordering::SeqCst);
            return Expiry::Notify;
        }
        Expiry::Idle
    }

    pub fn cancel(&self) {
        self.state.store(CANCELLED, Ordering::SeqCst);
        self.pending.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ARMED
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }

    #[inline]
    pub fn pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Counters exported through adapter stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MitigationStats {
    pub notifications: u64,
    pub coalesced: u64,
    pub expiries: u64,
}

struct Shared {
    state: MitigationState,
    interval: Duration,
    notifier: Arc<dyn Notifier>,
    deadline: Mutex<Option<Instant>>,
    cv: Condvar,
    shutdown: AtomicBool,
    notifications: AtomicU64,
    coalesced: AtomicU64,
    expiries: AtomicU64,
}

impl Shared {
    fn lock_deadline(&self) -> MutexGuard<'_, Option<Instant>> {
        self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self) {
        *self.lock_deadline() = Some(Instant::now() + self.interval);
        self.cv.notify_one();
    }

    fn fire(&self) -> Result<()> {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        self.notifier.notify()
    }
}

/// Timer-driven mitigation, or direct notification when the interval is
/// zero.
pub struct MitigationTimer {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MitigationTimer {
    /// Start a timer thread named `slr-mit-<name>`. A zero `interval`
    /// spawns nothing and notifies on every arrival.
    pub fn start(name: &str, interval: Duration, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: MitigationState::new(),
            interval,
            notifier,
            deadline: Mutex::new(None),
            cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            notifications: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            expiries: AtomicU64::new(0),
        });

        let thread = if interval.is_zero() {
            None
        } else {
            let s = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("slr-mit-{}", name))
                .spawn(move || timer_loop(s))
                .map_err(|e| RingError::Os(e.raw_os_error().unwrap_or(libc::EAGAIN)))?;
            kdebug!("mitigation timer for {} started, interval {:?}", name, interval);
            Some(handle)
        };

        Ok(Self {
            shared,
            thread: Mutex::new(thread),
        })
    }

    /// No timer: every arrival notifies.
    pub fn direct(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: MitigationState::new(),
                interval: Duration::ZERO,
                notifier,
                deadline: Mutex::new(None),
                cv: Condvar::new(),
                shutdown: AtomicBool::new(false),
                notifications: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                expiries: AtomicU64::new(0),
            }),
            thread: Mutex::new(None),
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    #[inline]
    pub fn state(&self) -> &MitigationState {
        &self.shared.state
    }

    /// A frame arrived. Never blocks beyond the deadline lock.
    pub fn on_arrival(&self) -> Result<()> {
        if self.shared.interval.is_zero() {
            if self.shared.state.is_cancelled() {
                return Ok(());
            }
            return self.shared.fire();
        }
        match self.shared.state.on_arrival() {
            Arrival::Notify => {
                self.shared.arm();
                self.shared.fire()
            }
            Arrival::Coalesced => {
                self.shared.coalesced.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Arrival::Cancelled => Ok(()),
        }
    }

    /// Stop the timer. After a successful return no expiry fires.
    ///
    /// Fails with `TimerCancel` when called from the timer thread itself
    /// (the thread still exits on its own) or when the thread panicked.
    pub fn cancel(&self) -> Result<()> {
        self.shared.state.cancel();
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.shared.lock_deadline();
            self.shared.cv.notify_all();
        }

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            return Err(RingError::TimerCancel);
        }
        handle.join().map_err(|_| RingError::TimerCancel)
    }

    pub fn stats(&self) -> MitigationStats {
        MitigationStats {
            notifications: self.shared.notifications.load(Ordering::Relaxed),
            coalesced: self.shared.coalesced.load(Ordering::Relaxed),
            expiries: self.shared.expiries.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MitigationTimer {
    fn drop(&mut self) {
        let _ = self.cancel();
    }
}

fn timer_loop(shared: Arc<Shared>) {
    loop {
        let notify = {
            let mut slot = shared.lock_deadline();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                let Some(at) = *slot else {
                    slot = shared.cv.wait(slot).unwrap_or_else(PoisonError::into_inner);
                    continue;
                };
                let now = Instant::now();
                if now < at {
                    slot = shared
                        .cv
                        .wait_timeout(slot, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                    continue;
                }
                *slot = None;
                shared.expiries.fetch_add(1, Ordering::Relaxed);
                match shared.state.on_expiry() {
                    Expiry::Notify => {
                        *slot = Some(now + shared.interval);
                        break true;
                    }
                    Expiry::Idle => break false,
                    Expiry::Cancelled => return,
                }
            }
        };
        if notify {
            if let Err(e) = shared.fire() {
                kwarn_rl!(5, "mitigation notify failed: {}", e);
            }
        }
    }
}
