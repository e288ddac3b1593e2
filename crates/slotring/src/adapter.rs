//! `Adapter` — one datapath exposed through slot rings.
//!
//! Built by `Adapter::attach()` and torn down by `detach()`. Owns:
//!
//! - the buffer arena shared by every ring,
//! - one TX kring per datapath TX queue and exactly one RX kring,
//! - the mitigation timer, ingress capture and egress adapter,
//! - the configuration lock under which interception is toggled.
//!
//! Each kring guards its producer and consumer handles with separate
//! mutexes: callers of the same role serialize, the two roles never
//! contend.
//!
//! A send refused for lack of slots marks its TX kring; the next tx sync
//! that frees slots there fires the write notifier once.
//!
//! ```text
//!   arena: [ tx0: tx_len bufs ][ tx1: tx_len bufs ] ... [ rx0: rx_len bufs ]
//! ```

use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;

use slotring_core::datapath::Datapath;
use slotring_core::error::{Result, RingError};
use slotring_core::notifier::Notifier;
use slotring_core::sg::{SgSink, SgSource};
use slotring_core::steering::{RxHandler, SteeringHook};
use slotring_core::{kdebug, kerror, kinfo, kwarn};

use crate::arena::BufferArena;
use crate::config::AdapterConfig;
use crate::egress::{EgressAdapter, EgressStats, TxReport};
use crate::ingress::{IngressCapture, IngressStats};
use crate::mitigation::{MitigationStats, MitigationTimer};
use crate::ring::{ConsumerHandle, ProducerHandle, Ring};
use crate::transfer::{self, Received, SendOptions};

/// Ring direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

bitflags! {
    /// Readiness as reported by `poll()`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Readiness: u8 {
        /// A packet is waiting on the RX ring or in the ingress backlog.
        const READABLE = 1 << 0;
        /// Some TX ring has a free slot.
        const WRITABLE = 1 << 1;
    }
}

/// Adapter dimensions, as returned by the `GetInfo` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub tx_rings: u16,
    pub rx_rings: u16,
    pub tx_slots: u32,
    pub rx_slots: u32,
    pub buf_size: usize,
    /// Bytes a consumer would map to see every buffer.
    pub map_len: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    pub egress: EgressStats,
    pub ingress: IngressStats,
    pub mitigation: MitigationStats,
    /// Write notifications fired after tx sync freed slots.
    pub write_wakeups: u64,
}

struct TxKring {
    prod: Mutex<ProducerHandle>,
    cons: Mutex<TxDrain>,
    /// A send was refused for lack of slots since the last wakeup.
    writer_waiting: AtomicBool,
}

struct TxDrain {
    handle: ConsumerHandle,
    /// Gather buffer for multi-slot packets.
    scratch: Vec<u8>,
}

struct RxKring {
    prod: Mutex<RxFill>,
    cons: Mutex<ConsumerHandle>,
}

struct RxFill {
    handle: ProducerHandle,
    /// Backlog frame waiting for room.
    stash: Option<Vec<u8>>,
}

/// Guarded by the configuration lock.
struct Control {
    intercepting: bool,
    detached: bool,
}

pub struct Adapter {
    name: String,
    steering: Arc<dyn SteeringHook>,
    arena: Arc<BufferArena>,
    tx: Vec<TxKring>,
    rx: RxKring,
    tx_slots: u32,
    rx_slots: u32,
    mitigation: Arc<MitigationTimer>,
    ingress: Arc<IngressCapture>,
    egress: EgressAdapter,
    write_notifier: Mutex<Arc<dyn Notifier>>,
    write_wakeups: AtomicU64,
    ctl: Mutex<Control>,
    alive: AtomicBool,
    socket_owned: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Adapter {
    /// Attach to `datapath`.
    ///
    /// Ring lengths come from the datapath when it reports them, otherwise
    /// from `config`. The datapath's RX queue count is ignored: all
    /// captured traffic lands on a single RX ring.
    pub fn attach(
        name: &str,
        datapath: Arc<dyn Datapath>,
        steering: Arc<dyn SteeringHook>,
        notifier: Arc<dyn Notifier>,
        config: AdapterConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let (tx_slots, rx_slots) = match datapath.ring_lengths() {
            Some((tx, rx)) if tx > 0 && rx > 0 => (tx, rx),
            Some(_) => {
                kwarn!("{}: datapath reports an empty ring, using configured lengths", name);
                (config.tx_slots, config.rx_slots)
            }
            None => (config.tx_slots, config.rx_slots),
        };
        let (tx_queues, rx_queues) = datapath.queue_counts();
        let tx_queues = tx_queues.max(1);
        if rx_queues > 1 {
            kinfo!("{}: {} rx queues reported, using 1", name, rx_queues);
        }

        let total = (tx_queues as u32)
            .checked_mul(tx_slots)
            .and_then(|n| n.checked_add(rx_slots))
            .ok_or(RingError::InvalidConfig("ring dimensions overflow"))?;
        let arena = Arc::new(BufferArena::new(total, config.buf_size)?);

        let mut tx = Vec::with_capacity(tx_queues as usize);
        for q in 0..tx_queues as u32 {
            let (p, c) = Ring::new(tx_slots, Arc::clone(&arena), q * tx_slots)?;
            tx.push(TxKring {
                prod: Mutex::new(p),
                cons: Mutex::new(TxDrain { handle: c, scratch: Vec::new() }),
                writer_waiting: AtomicBool::new(false),
            });
        }
        let (p, c) = Ring::new(rx_slots, Arc::clone(&arena), tx_queues as u32 * tx_slots)?;
        let rx = RxKring {
            prod: Mutex::new(RxFill { handle: p, stash: None }),
            cons: Mutex::new(c),
        };

        let write_notifier = Arc::clone(&notifier);
        let mitigation = Arc::new(if config.mitigation_active() {
            MitigationTimer::start(name, config.mit_interval, notifier)?
        } else {
            MitigationTimer::direct(notifier)
        });
        let max_frame = rx_slots as usize * config.buf_size;
        let ingress = Arc::new(IngressCapture::new(config.backlog, max_frame, Arc::clone(&mitigation)));

        kinfo!(
            "{}: attached to {} ({} tx x {} slots, 1 rx x {} slots, {} B buffers)",
            name,
            datapath.name(),
            tx_queues,
            tx_slots,
            rx_slots,
            config.buf_size
        );
        config.log();

        Ok(Arc::new(Self {
            name: name.to_string(),
            steering,
            arena,
            tx,
            rx,
            tx_slots,
            rx_slots,
            mitigation,
            ingress,
            egress: EgressAdapter::new(datapath),
            write_notifier: Mutex::new(write_notifier),
            write_wakeups: AtomicU64::new(0),
            ctl: Mutex::new(Control { intercepting: false, detached: false }),
            alive: AtomicBool::new(true),
            socket_owned: AtomicBool::new(false),
        }))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(RingError::AdapterUnavailable)
        }
    }

    fn tx_kring(&self, ring: u16) -> Result<&TxKring> {
        self.tx.get(ring as usize).ok_or(RingError::InvalidRing(ring))
    }

    pub fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.name.clone(),
            tx_rings: self.tx.len() as u16,
            rx_rings: 1,
            tx_slots: self.tx_slots,
            rx_slots: self.rx_slots,
            buf_size: self.arena.buf_size(),
            map_len: self.arena.map_len(),
        }
    }

    /// Notifier fired when tx sync frees slots after a refused send.
    /// Defaults to the receive notifier passed to `attach`.
    pub fn set_write_notifier(&self, notifier: Arc<dyn Notifier>) {
        *lock(&self.write_notifier) = notifier;
    }

    /// Arena address behind a mapping offset.
    pub fn map_offset(&self, offset: usize) -> Option<*const u8> {
        self.arena.map_offset(offset)
    }

    // ── Sync ──

    /// Transmit everything pending on TX ring `ring`.
    pub fn tx_sync(&self, ring: u16) -> Result<TxReport> {
        self.check_alive()?;
        let kring = self.tx_kring(ring)?;
        let report = {
            let mut drain = lock(&kring.cons);
            let TxDrain { handle, scratch } = &mut *drain;
            self.egress.drain(ring, handle, scratch)?
        };
        if report.slots > 0 {
            // Pairs with the fence in `send`: either the writer sees the
            // freed slots or we see its flag.
            fence(Ordering::SeqCst);
            if kring.writer_waiting.swap(false, Ordering::SeqCst) {
                self.write_wakeups.fetch_add(1, Ordering::Relaxed);
                let notifier = Arc::clone(&*lock(&self.write_notifier));
                notifier.notify()?;
            }
        }
        Ok(report)
    }

    /// Move captured frames into RX ring `ring`. Returns frames moved.
    pub fn rx_sync(&self, ring: u16) -> Result<usize> {
        self.check_alive()?;
        if ring != 0 {
            return Err(RingError::InvalidRing(ring));
        }
        let mut fill = lock(&self.rx.prod);
        let RxFill { handle, stash } = &mut *fill;
        Ok(self.ingress.drain_into(handle, stash))
    }

    // ── Scatter/gather front-end paths ──

    /// Queue `src` as one packet on TX ring `ring`, then tx sync it.
    ///
    /// Once the packet is committed the full count is returned; a failed
    /// tx sync afterwards is only logged, the packet stays queued.
    pub fn send<S: SgSource + ?Sized>(&self, ring: u16, src: &S, opts: SendOptions) -> Result<usize> {
        self.check_alive()?;
        let kring = self.tx_kring(ring)?;
        let n = {
            let mut prod = lock(&kring.prod);
            match transfer::send(&mut prod, src, opts) {
                Err(RingError::InsufficientSlots { .. }) => {
                    kring.writer_waiting.store(true, Ordering::SeqCst);
                    fence(Ordering::SeqCst);
                    // A tx sync may have freed slots before the flag landed.
                    transfer::send(&mut prod, src, opts)?
                }
                r => r?,
            }
        };
        if n > 0 {
            if let Err(e) = self.tx_sync(ring) {
                kdebug!("{}: tx sync after send on ring {}: {}", self.name, ring, e);
            }
        }
        Ok(n)
    }

    /// rx sync, then copy the next packet into `dst`.
    pub fn receive<D: SgSink + ?Sized>(&self, dst: &mut D) -> Result<Received> {
        self.rx_sync(0)?;
        let mut cons = lock(&self.rx.cons);
        transfer::receive(&mut cons, dst)
    }

    // ── Direct slot access ──

    /// Run `f` on the producer side of TX ring `ring`.
    pub fn with_tx_ring<R>(&self, ring: u16, f: impl FnOnce(&mut ProducerHandle) -> R) -> Result<R> {
        self.check_alive()?;
        let kring = self.tx_kring(ring)?;
        let mut prod = lock(&kring.prod);
        Ok(f(&mut *prod))
    }

    /// Run `f` on the consumer side of the RX ring.
    pub fn with_rx_ring<R>(&self, f: impl FnOnce(&mut ConsumerHandle) -> R) -> Result<R> {
        self.check_alive()?;
        let mut cons = lock(&self.rx.cons);
        Ok(f(&mut *cons))
    }

    /// Readiness without syncing.
    pub fn poll(&self) -> Readiness {
        let mut r = Readiness::empty();
        if !self.is_alive() {
            return r;
        }
        if self.ingress.backlog_len() > 0 || lock(&self.rx.cons).avail() > 0 {
            r |= Readiness::READABLE;
        }
        if self.tx.iter().any(|k| lock(&k.prod).avail() > 0) {
            r |= Readiness::WRITABLE;
        }
        r
    }

    // ── Control ──

    /// Steer the datapath's receive traffic into the RX ring.
    pub fn enable_interception(&self) -> Result<()> {
        let mut ctl = lock(&self.ctl);
        if ctl.detached {
            return Err(RingError::AdapterUnavailable);
        }
        if ctl.intercepting {
            return Ok(());
        }
        let handler: Arc<dyn RxHandler> = self.ingress.clone();
        self.steering.enable(0, handler)?;
        ctl.intercepting = true;
        kinfo!("{}: receive interception enabled", self.name);
        Ok(())
    }

    /// Give receive traffic back to the host.
    pub fn disable_interception(&self) -> Result<()> {
        let mut ctl = lock(&self.ctl);
        if !ctl.intercepting {
            return Ok(());
        }
        self.steering.disable(0)?;
        ctl.intercepting = false;
        kinfo!("{}: receive interception disabled", self.name);
        Ok(())
    }

    pub fn is_intercepting(&self) -> bool {
        lock(&self.ctl).intercepting
    }

    /// Reset one ring after an error: cursors to zero, slots cleared.
    /// Waits for both roles to be idle.
    pub fn reinit_ring(&self, dir: Direction, ring: u16) -> Result<()> {
        self.check_alive()?;
        match dir {
            Direction::Tx => {
                let kring = self.tx_kring(ring)?;
                let mut prod = lock(&kring.prod);
                let mut drain = lock(&kring.cons);
                Ring::reset(&mut prod, &mut drain.handle)?;
            }
            Direction::Rx => {
                if ring != 0 {
                    return Err(RingError::InvalidRing(ring));
                }
                let mut fill = lock(&self.rx.prod);
                let mut cons = lock(&self.rx.cons);
                Ring::reset(&mut fill.handle, &mut cons)?;
                fill.stash = None;
            }
        }
        kwarn!("{}: {:?} ring {} reinitialized", self.name, dir, ring);
        Ok(())
    }

    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            egress: self.egress.stats(),
            ingress: self.ingress.stats(),
            mitigation: self.mitigation.stats(),
            write_wakeups: self.write_wakeups.load(Ordering::Relaxed),
        }
    }

    /// Claim the single socket slot. `Busy` if already taken.
    pub(crate) fn claim_socket(&self) -> Result<()> {
        self.check_alive()?;
        self.socket_owned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| RingError::Busy)
    }

    pub(crate) fn release_socket(&self) {
        self.socket_owned.store(false, Ordering::Release);
    }

    /// Tear down: restore steering, cancel mitigation, fail every later
    /// call with `AdapterUnavailable`. Every step runs; the first error
    /// is returned. Idempotent.
    pub fn detach(&self) -> Result<()> {
        let mut ctl = lock(&self.ctl);
        if ctl.detached {
            return Ok(());
        }
        ctl.detached = true;
        self.alive.store(false, Ordering::Release);

        let mut first_err = None;
        if ctl.intercepting {
            match self.steering.disable(0) {
                Ok(()) => ctl.intercepting = false,
                Err(e) => {
                    kerror!("{}: restoring steering failed: {}", self.name, e);
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Err(e) = self.mitigation.cancel() {
            kerror!("{}: mitigation cancel failed: {}", self.name, e);
            first_err.get_or_insert(e);
        }
        kinfo!("{}: detached", self.name);
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            kwarn!("{}: detach on drop: {}", self.name, e);
        }
    }
}
