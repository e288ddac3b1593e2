//! Egress — TX ring slots out to the datapath.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use slotring_core::datapath::{Datapath, XmitStatus};
use slotring_core::error::{Result, RingError};
use slotring_core::slot::FlagsPatch;
use slotring_core::{ktrace, kwarn_rl};

use crate::ring::ConsumerHandle;

/// What became of one frame. Drops and hard errors look the same to the
/// ring; the distinction only shows up in stats and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressOutcome {
    Sent,
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EgressStats {
    pub sent: u64,
    pub dropped: u64,
    /// Subset of `dropped` caused by hard transmit errors.
    pub errors: u64,
}

/// Result of one tx sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxReport {
    pub packets: u32,
    pub sent: u32,
    pub dropped: u32,
    /// Slots released back to the producer.
    pub slots: u32,
}

impl TxReport {
    pub fn merge(&mut self, other: TxReport) {
        self.packets += other.packets;
        self.sent += other.sent;
        self.dropped += other.dropped;
        self.slots += other.slots;
    }

    fn count(&mut self, outcome: EgressOutcome) {
        self.packets += 1;
        match outcome {
            EgressOutcome::Sent => self.sent += 1,
            EgressOutcome::Dropped => self.dropped += 1,
        }
    }
}

pub struct EgressAdapter {
    datapath: Arc<dyn Datapath>,
    sent: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

impl EgressAdapter {
    pub fn new(datapath: Arc<dyn Datapath>) -> Self {
        Self {
            datapath,
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Hand one frame to the datapath.
    pub fn transmit(&self, queue: u16, frame: &[u8]) -> EgressOutcome {
        match self.datapath.transmit(queue, frame) {
            XmitStatus::Success => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                EgressOutcome::Sent
            }
            XmitStatus::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                ktrace!("{} queue {}: frame dropped", self.datapath.name(), queue);
                EgressOutcome::Dropped
            }
            XmitStatus::Error(code) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.errors.fetch_add(1, Ordering::Relaxed);
                kwarn_rl!(5, "{} queue {}: transmit error {}", self.datapath.name(), queue, code);
                EgressOutcome::Dropped
            }
        }
    }

    /// Transmit every complete packet on the consumer side of a TX ring
    /// and release its slots, whatever the outcome.
    ///
    /// A multi-slot packet is gathered into `scratch` first. A packet
    /// whose tail has not been published yet stays on the ring, unless it
    /// already fills the whole ring, in which case it is dropped.
    pub fn drain(&self, queue: u16, cons: &mut ConsumerHandle, scratch: &mut Vec<u8>) -> Result<TxReport> {
        let mut report = TxReport::default();
        let avail = cons.avail();
        if avail == 0 {
            return Ok(report);
        }
        let res = cons.reserve(avail)?;

        let mut done = 0u32;
        while done < avail {
            let head = cons.slot_at(res.index(done)).ok_or(RingError::StaleReservation)?;
            if !head.more_frag() {
                report.count(self.transmit(queue, head.payload()));
                done += 1;
                continue;
            }

            scratch.clear();
            let mut end = done;
            let mut complete = false;
            while end < avail {
                let s = cons.slot_at(res.index(end)).ok_or(RingError::StaleReservation)?;
                scratch.extend_from_slice(s.payload());
                end += 1;
                if !s.more_frag() {
                    complete = true;
                    break;
                }
            }

            if complete {
                report.count(self.transmit(queue, &scratch[..]));
                done = end;
            } else {
                if avail == cons.capacity() {
                    kwarn_rl!(5, "queue {}: unterminated packet fills the TX ring, dropped", queue);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    report.count(EgressOutcome::Dropped);
                    done = end;
                }
                break;
            }
        }

        report.slots = cons.commit(res, done, FlagsPatch::NONE)?;
        Ok(report)
    }

    pub fn stats(&self) -> EgressStats {
        EgressStats {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
