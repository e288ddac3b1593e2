//! `LoopbackDatapath` — an in-process device whose transmit path feeds
//! its own receive path.
//!
//! Every RX queue has a `DispatchTable` whose default handler is the
//! host stack (`HostStack`, which just counts frames). Transmitted frames
//! are dispatched on RX queue `queue % rx_queues`, so a frame sent
//! through the TX ring comes back through receive interception.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use slotring_core::datapath::{Datapath, XmitStatus};
use slotring_core::error::{Result, RingError};
use slotring_core::steering::{RxHandler, RxVerdict, SteeringHook};

use crate::dispatch::DispatchTable;

/// Stand-in for the host network stack: takes every frame it is given.
#[derive(Default)]
pub struct HostStack {
    frames: AtomicU64,
}

impl HostStack {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl RxHandler for HostStack {
    fn handle(&self, _queue: u16, _frame: &[u8]) -> RxVerdict {
        self.frames.fetch_add(1, Ordering::Relaxed);
        RxVerdict::Pass
    }
}

pub struct LoopbackDatapath {
    name: String,
    tx_queues: u16,
    ring_lengths: Option<(u32, u32)>,
    host: Arc<HostStack>,
    rx: Vec<DispatchTable>,
    /// Handler displaced by `enable()`, per RX queue.
    saved: Mutex<Vec<Option<Arc<dyn RxHandler>>>>,
    /// Forced transmit result, if any.
    xmit_status: Mutex<Option<XmitStatus>>,
    transmitted: AtomicU64,
}

impl LoopbackDatapath {
    /// One TX and one RX queue, no reported ring lengths.
    pub fn new(name: &str) -> Self {
        let host = Arc::new(HostStack::default());
        Self {
            name: name.to_string(),
            tx_queues: 1,
            ring_lengths: None,
            rx: vec![DispatchTable::new(Some(host.clone()))],
            saved: Mutex::new(vec![None]),
            host,
            xmit_status: Mutex::new(None),
            transmitted: AtomicU64::new(0),
        }
    }

    pub fn with_queues(mut self, tx: u16, rx: u16) -> Self {
        let rx = rx.max(1) as usize;
        self.tx_queues = tx.max(1);
        self.rx = (0..rx)
            .map(|_| DispatchTable::new(Some(self.host.clone())))
            .collect();
        self.saved = Mutex::new(vec![None; rx]);
        self
    }

    pub fn with_ring_lengths(mut self, tx: u32, rx: u32) -> Self {
        self.ring_lengths = Some((tx, rx));
        self
    }

    /// Make every transmit return `status`; `None` restores normal
    /// delivery.
    pub fn set_xmit_status(&self, status: Option<XmitStatus>) {
        *self.xmit_status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// A frame arrives from the wire on `queue`.
    pub fn inject(&self, queue: u16, frame: &[u8]) -> RxVerdict {
        let table = &self.rx[queue as usize % self.rx.len()];
        table.dispatch(queue, frame)
    }

    /// Frames that reached the host stack.
    pub fn host_frames(&self) -> u64 {
        self.host.frames()
    }

    /// Frames accepted by `transmit()`.
    pub fn transmitted(&self) -> u64 {
        self.transmitted.load(Ordering::Relaxed)
    }
}

impl Datapath for LoopbackDatapath {
    fn transmit(&self, queue: u16, frame: &[u8]) -> XmitStatus {
        let forced = *self.xmit_status.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = forced {
            if status != XmitStatus::Success {
                return status;
            }
        }
        self.transmitted.fetch_add(1, Ordering::Relaxed);
        self.inject(queue, frame);
        XmitStatus::Success
    }

    fn ring_lengths(&self) -> Option<(u32, u32)> {
        self.ring_lengths
    }

    fn queue_counts(&self) -> (u16, u16) {
        (self.tx_queues, self.rx.len() as u16)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl SteeringHook for LoopbackDatapath {
    fn enable(&self, ring: u16, handler: Arc<dyn RxHandler>) -> Result<()> {
        let table = self.rx.get(ring as usize).ok_or(RingError::InvalidRing(ring))?;
        let mut saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);
        if saved[ring as usize].is_some() {
            return Err(RingError::Busy);
        }
        saved[ring as usize] = table.exchange(Some(handler));
        Ok(())
    }

    fn disable(&self, ring: u16) -> Result<()> {
        let table = self.rx.get(ring as usize).ok_or(RingError::InvalidRing(ring))?;
        let mut saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);
        let prev = saved[ring as usize].take();
        table.exchange(prev);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink(AtomicU64);

    impl RxHandler for Sink {
        fn handle(&self, _queue: u16, _frame: &[u8]) -> RxVerdict {
            self.0.fetch_add(1, Ordering::Relaxed);
            RxVerdict::Consumed
        }
    }

    #[test]
    fn test_transmit_reaches_host_by_default() {
        let lb = LoopbackDatapath::new("lo");
        assert_eq!(lb.transmit(0, b"ping"), XmitStatus::Success);
        assert_eq!(lb.host_frames(), 1);
        assert_eq!(lb.transmitted(), 1);
    }

    #[test]
    fn test_enable_disable_restores_host() {
        let lb = LoopbackDatapath::new("lo");
        let sink = Arc::new(Sink(AtomicU64::new(0)));
        lb.enable(0, sink.clone()).unwrap();
        assert_eq!(lb.enable(0, sink.clone()), Err(RingError::Busy));
        assert_eq!(lb.inject(0, b"x"), RxVerdict::Consumed);
        lb.disable(0).unwrap();
        assert_eq!(lb.inject(0, b"y"), RxVerdict::Pass);
        assert_eq!(sink.0.load(Ordering::Relaxed), 1);
        assert_eq!(lb.host_frames(), 1);
        assert_eq!(lb.enable(3, sink), Err(RingError::InvalidRing(3)));
    }

    #[test]
    fn test_forced_status() {
        let lb = LoopbackDatapath::new("lo").with_queues(2, 2);
        assert_eq!(lb.queue_counts(), (2, 2));
        lb.set_xmit_status(Some(XmitStatus::Dropped));
        assert_eq!(lb.transmit(1, b"z"), XmitStatus::Dropped);
        assert_eq!(lb.host_frames(), 0);
        lb.set_xmit_status(None);
        assert_eq!(lb.transmit(1, b"z"), XmitStatus::Success);
        assert_eq!(lb.host_frames(), 1);
    }
}
