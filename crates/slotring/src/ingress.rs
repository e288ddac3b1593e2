//! Ingress interception — captured frames on their way to the RX ring.
//!
//! While interception is enabled the datapath's receive dispatch for the
//! adapter's ring points at an `IngressCapture`. Capture runs on the
//! datapath context and must not block, so it only copies the frame onto
//! a bounded lock-free backlog and pings the mitigation timer. `rx_sync`
//! later moves backlog frames into RX ring slots with the outbound
//! transfer routine.
//!
//! ```text
//!   datapath ──dispatch──▶ IngressCapture::handle ──push──▶ backlog
//!                                   │
//!                                   └──▶ MitigationTimer::on_arrival
//!
//!   rx_sync ──pop──▶ transfer::send ──▶ RX ring (producer side)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use slotring_core::error::RingError;
use slotring_core::steering::{RxHandler, RxVerdict};
use slotring_core::{kdebug, kwarn_rl};

use crate::mitigation::MitigationTimer;
use crate::ring::ProducerHandle;
use crate::transfer::{self, SendOptions};

/// Capture counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngressStats {
    /// Frames queued on the backlog.
    pub captured: u64,
    /// Frames moved into the RX ring.
    pub delivered: u64,
    /// Dropped because the backlog was full.
    pub dropped_backlog: u64,
    /// Dropped because the RX ring could never hold them.
    pub dropped_oversize: u64,
}

pub struct IngressCapture {
    backlog: ArrayQueue<Vec<u8>>,
    /// Largest frame the RX ring can carry.
    max_frame: usize,
    mitigation: Arc<MitigationTimer>,
    captured: AtomicU64,
    delivered: AtomicU64,
    dropped_backlog: AtomicU64,
    dropped_oversize: AtomicU64,
}

impl IngressCapture {
    pub fn new(backlog: usize, max_frame: usize, mitigation: Arc<MitigationTimer>) -> Self {
        Self {
            backlog: ArrayQueue::new(backlog.max(1)),
            max_frame,
            mitigation,
            captured: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped_backlog: AtomicU64::new(0),
            dropped_oversize: AtomicU64::new(0),
        }
    }

    /// Frames waiting for rx sync.
    #[inline]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Move backlog frames into the RX ring until it is full or the
    /// backlog is empty. A frame that does not fit right now is parked in
    /// `stash` and goes first next time. Returns frames delivered.
    pub fn drain_into(&self, prod: &mut ProducerHandle, stash: &mut Option<Vec<u8>>) -> usize {
        let mut moved = 0;
        loop {
            let Some(frame) = stash.take().or_else(|| self.backlog.pop()) else {
                break;
            };
            match transfer::send(prod, &[&frame[..]][..], SendOptions::default()) {
                Ok(_) => moved += 1,
                Err(RingError::InsufficientSlots { .. }) => {
                    *stash = Some(frame);
                    break;
                }
                Err(e) => {
                    kwarn_rl!(5, "rx sync dropped a {}-byte frame: {}", frame.len(), e);
                }
            }
        }
        if moved > 0 {
            self.delivered.fetch_add(moved as u64, Ordering::Relaxed);
            kdebug!("rx sync moved {} frames, {} left", moved, self.backlog.len());
        }
        moved
    }

    pub fn stats(&self) -> IngressStats {
        IngressStats {
            captured: self.captured.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_backlog: self.dropped_backlog.load(Ordering::Relaxed),
            dropped_oversize: self.dropped_oversize.load(Ordering::Relaxed),
        }
    }
}

impl RxHandler for IngressCapture {
    fn handle(&self, queue: u16, frame: &[u8]) -> RxVerdict {
        if frame.len() > self.max_frame {
            self.dropped_oversize.fetch_add(1, Ordering::Relaxed);
            kwarn_rl!(5, "queue {}: {}-byte frame exceeds RX ring ({} bytes)", queue, frame.len(), self.max_frame);
            return RxVerdict::Consumed;
        }
        if self.backlog.push(frame.to_vec()).is_err() {
            self.dropped_backlog.fetch_add(1, Ordering::Relaxed);
            kwarn_rl!(5, "queue {}: rx backlog full, frame dropped", queue);
            return RxVerdict::Consumed;
        }
        self.captured.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.mitigation.on_arrival() {
            kwarn_rl!(5, "rx notification failed: {}", e);
        }
        RxVerdict::Consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::BufferArena;
    use crate::condvar_notifier::CondvarNotifier;
    use crate::ring::{ConsumerHandle, Ring};

    fn setup(backlog: usize) -> (IngressCapture, Arc<CondvarNotifier>, ProducerHandle, ConsumerHandle) {
        let n = Arc::new(CondvarNotifier::new());
        let mit = Arc::new(MitigationTimer::direct(n.clone()));
        let arena = Arc::new(BufferArena::new(4, 64).unwrap());
        let (p, c) = Ring::new(4, arena, 0).unwrap();
        (IngressCapture::new(backlog, 4 * 64, mit), n, p, c)
    }

    #[test]
    fn test_capture_queues_and_notifies() {
        let (cap, n, _p, _c) = setup(8);
        assert_eq!(cap.handle(0, b"hello"), RxVerdict::Consumed);
        assert_eq!(cap.handle(0, b"world"), RxVerdict::Consumed);
        assert_eq!(cap.backlog_len(), 2);
        assert_eq!(n.count(), 2);
        assert_eq!(cap.stats().captured, 2);
    }

    #[test]
    fn test_backlog_overflow_and_oversize_dropped() {
        let (cap, n, _p, _c) = setup(1);
        cap.handle(0, b"a");
        cap.handle(0, b"b");
        cap.handle(0, &[0u8; 4 * 64 + 1]);
        let s = cap.stats();
        assert_eq!(s.captured, 1);
        assert_eq!(s.dropped_backlog, 1);
        assert_eq!(s.dropped_oversize, 1);
        assert_eq!(n.count(), 1);
    }

    #[test]
    fn test_drain_stashes_what_does_not_fit() {
        let (cap, _n, mut p, mut c) = setup(8);
        cap.handle(0, &[1u8; 100]); // 2 slots
        cap.handle(0, &[2u8; 100]); // 2 slots
        cap.handle(0, &[3u8; 10]); // does not fit yet

        let mut stash = None;
        assert_eq!(cap.drain_into(&mut p, &mut stash), 2);
        assert_eq!(stash.as_deref().map(|f| f.len()), Some(10));
        assert_eq!(p.avail(), 0);

        let mut out = [0u8; 128];
        let got = transfer::receive(&mut c, &mut [&mut out[..]][..]).unwrap();
        assert_eq!(got.bytes, 100);
        assert!(out[..100].iter().all(|&b| b == 1));

        assert_eq!(cap.drain_into(&mut p, &mut stash), 1);
        assert!(stash.is_none());
        assert_eq!(cap.stats().delivered, 3);
        assert_eq!(cap.backlog_len(), 0);
    }
}
