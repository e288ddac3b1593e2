//! `Ring` — fixed-capacity circular buffer of slots with two role handles.
//!
//! A ring is shared by exactly one producer and one consumer. Neither role
//! takes a lock: each role owns one cursor and only reads the other.
//!
//! # Cursors
//!
//! `prod` and `cons` are u64 and monotonically increasing. Slot index is
//! `value % capacity`.
//!
//! - Producer owns slots `[prod, cons + capacity)`: `avail = cap - (prod - cons)`.
//! - Consumer owns slots `[cons, prod)`: `avail = prod - cons`.
//!
//! # Atomics
//!
//! The producer writes slot metadata and payload, then publishes `prod`
//! with Release; the consumer loads `prod` with Acquire before touching
//! the slots. Symmetrically for `cons`, so a freed slot is not rewritten
//! while the consumer still reads it.
//!
//! # Roles
//!
//! `Ring::new()` returns the only `ProducerHandle` and the only
//! `ConsumerHandle`. Neither is `Clone`; every mutating method takes
//! `&mut self`, so "single writer per role" is a compile-time property.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use slotring_core::error::{Result, RingError};
use slotring_core::slot::{FlagsPatch, SlotFlags, SlotMeta};

use crate::arena::BufferArena;

pub struct Ring {
    slots: Box<[UnsafeCell<SlotMeta>]>,
    arena: Arc<BufferArena>,
    capacity: u32,
    /// Slots published by the producer. Producer writes, consumer reads.
    prod: AtomicU64,
    /// Slots released by the consumer. Consumer writes, producer reads.
    cons: AtomicU64,
}

// Safety: slot cells are only touched by the role that owns them under
// the cursor protocol above.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Create a ring of `capacity` slots backed by arena buffers
    /// `first_buf .. first_buf + capacity`.
    pub fn new(
        capacity: u32,
        arena: Arc<BufferArena>,
        first_buf: u32,
    ) -> Result<(ProducerHandle, ConsumerHandle)> {
        let end = first_buf.checked_add(capacity).ok_or(RingError::Os(libc::EINVAL))?;
        if capacity == 0 || end > arena.count() {
            return Err(RingError::Os(libc::EINVAL));
        }

        let slots = (0..capacity)
            .map(|i| UnsafeCell::new(SlotMeta::new(first_buf + i)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let ring = Arc::new(Ring {
            slots,
            arena,
            capacity,
            prod: AtomicU64::new(0),
            cons: AtomicU64::new(0),
        });

        Ok((
            ProducerHandle { ring: Arc::clone(&ring) },
            ConsumerHandle { ring, resume: 0 },
        ))
    }

    /// Reinitialize after an error: both cursors to zero, every slot's
    /// length and flags cleared, consumer resume offset dropped.
    ///
    /// Holding both handles mutably means neither role is mid-transfer.
    pub fn reset(prod: &mut ProducerHandle, cons: &mut ConsumerHandle) -> Result<()> {
        if !Arc::ptr_eq(&prod.ring, &cons.ring) {
            return Err(RingError::HandleMismatch);
        }
        let ring = &prod.ring;
        for cell in ring.slots.iter() {
            // Safety: both roles are exclusively borrowed.
            let meta = unsafe { &mut *cell.get() };
            meta.len = 0;
            meta.flags = SlotFlags::empty();
        }
        ring.cons.store(0, Ordering::Release);
        ring.prod.store(0, Ordering::Release);
        cons.resume = 0;
        Ok(())
    }

    #[inline]
    fn index(&self, pos: u64) -> u32 {
        (pos % self.capacity as u64) as u32
    }

    /// Position of `index` relative to the cursor at `pos`.
    #[inline]
    fn rel(&self, pos: u64, index: u32) -> u32 {
        let cur = self.index(pos);
        (index + self.capacity - cur) % self.capacity
    }

    #[inline]
    fn ptr_id(&self) -> usize {
        self as *const Ring as usize
    }
}

/// Slots granted by `reserve()`. Must be handed back to `commit()` of the
/// same handle; dropping it without committing leaves the ring unchanged.
#[derive(Debug)]
#[must_use = "a reservation does nothing until committed"]
pub struct Reservation {
    start: u64,
    len: u32,
    capacity: u32,
    ring: usize,
}

impl Reservation {
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ring index of the `i`-th reserved slot.
    #[inline]
    pub fn index(&self, i: u32) -> u32 {
        ((self.start + i as u64) % self.capacity as u64) as u32
    }
}

/// Read access to one slot.
pub struct SlotRef<'a> {
    meta: SlotMeta,
    buf: &'a [u8],
}

impl<'a> SlotRef<'a> {
    #[inline]
    pub fn meta(&self) -> SlotMeta {
        self.meta
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.meta.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.meta.len == 0
    }

    #[inline]
    pub fn flags(&self) -> SlotFlags {
        self.meta.flags
    }

    #[inline]
    pub fn more_frag(&self) -> bool {
        self.meta.more_frag()
    }

    /// Valid bytes. A length larger than the buffer is clamped.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        let n = (self.meta.len as usize).min(self.buf.len());
        &self.buf[..n]
    }
}

/// Write access to one slot.
pub struct SlotMut<'a> {
    meta: &'a mut SlotMeta,
    buf: &'a mut [u8],
}

impl<'a> SlotMut<'a> {
    #[inline]
    pub fn buf_idx(&self) -> u32 {
        self.meta.buf_idx
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.meta.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.meta.len == 0
    }

    #[inline]
    pub fn flags(&self) -> SlotFlags {
        self.meta.flags
    }

    #[inline]
    pub fn set_flags(&mut self, flags: SlotFlags) {
        self.meta.flags = flags;
    }

    /// Set the valid length, clamped to the buffer size.
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        self.meta.len = len.min(self.buf.len()) as u32;
    }

    /// The whole buffer, regardless of the current length.
    #[inline]
    pub fn buf_mut(&mut self) -> &mut [u8] {
        self.buf
    }
}

// ── Producer ──

/// The producer role of a ring: fills free slots and publishes them.
pub struct ProducerHandle {
    ring: Arc<Ring>,
}

impl ProducerHandle {
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.ring.capacity
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.ring.arena.buf_size()
    }

    /// Index of the next slot to fill.
    #[inline]
    pub fn cur(&self) -> u32 {
        self.ring.index(self.ring.prod.load(Ordering::Relaxed))
    }

    /// Free slots.
    #[inline]
    pub fn avail(&self) -> u32 {
        let prod = self.ring.prod.load(Ordering::Relaxed);
        let cons = self.ring.cons.load(Ordering::Acquire);
        self.ring.capacity - prod.wrapping_sub(cons) as u32
    }

    /// Slots published but not yet released by the consumer.
    #[inline]
    pub fn pending(&self) -> u32 {
        self.ring.capacity - self.avail()
    }

    /// Reserve `n` slots starting at `cur`.
    pub fn reserve(&mut self, n: u32) -> Result<Reservation> {
        let avail = self.avail();
        if avail < n {
            return Err(RingError::InsufficientSlots { needed: n, avail });
        }
        Ok(Reservation {
            start: self.ring.prod.load(Ordering::Relaxed),
            len: n,
            capacity: self.ring.capacity,
            ring: self.ring.ptr_id(),
        })
    }

    /// Slot `index`, if it lies inside the producer's window.
    pub fn slot_at(&mut self, index: u32) -> Option<SlotMut<'_>> {
        if index >= self.ring.capacity {
            return None;
        }
        let prod = self.ring.prod.load(Ordering::Relaxed);
        if self.ring.rel(prod, index) >= self.avail() {
            return None;
        }
        // Safety: slot is in [prod, cons + cap), owned by the producer;
        // &mut self keeps a second SlotMut from existing.
        unsafe {
            let meta = &mut *self.ring.slots[index as usize].get();
            let buf = self.ring.arena.buf_mut(meta.buf_idx);
            Some(SlotMut { meta, buf })
        }
    }

    /// Publish the first `used` slots of `res`.
    ///
    /// The last published slot gets `patch` applied and `MOREFRAG`
    /// cleared. Returns the number of slots published.
    pub fn commit(&mut self, res: Reservation, used: u32, patch: FlagsPatch) -> Result<u32> {
        let prod = self.ring.prod.load(Ordering::Relaxed);
        if res.ring != self.ring.ptr_id() || res.start != prod {
            return Err(RingError::StaleReservation);
        }
        let used = used.min(res.len);
        if used == 0 {
            return Ok(0);
        }
        let last = res.index(used - 1);
        // Safety: still producer-owned until the store below.
        unsafe {
            let meta = &mut *self.ring.slots[last as usize].get();
            meta.flags = patch.apply(meta.flags);
        }
        self.ring.prod.store(prod + used as u64, Ordering::Release);
        Ok(used)
    }

    /// Publish without closing the last slot, the way a producer sharing
    /// the mapping from outside this crate could.
    #[cfg(test)]
    pub(crate) fn commit_open(&mut self, res: Reservation, used: u32) -> Result<u32> {
        let prod = self.ring.prod.load(Ordering::Relaxed);
        if res.start != prod {
            return Err(RingError::StaleReservation);
        }
        let used = used.min(res.len);
        self.ring.prod.store(prod + used as u64, Ordering::Release);
        Ok(used)
    }
}

// ── Consumer ──

/// The consumer role of a ring: reads published slots and releases them.
pub struct ConsumerHandle {
    ring: Arc<Ring>,
    /// Bytes already delivered from the slot at `cur`.
    resume: u32,
}

impl ConsumerHandle {
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.ring.capacity
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.ring.arena.buf_size()
    }

    /// Index of the next slot to read.
    #[inline]
    pub fn cur(&self) -> u32 {
        self.ring.index(self.ring.cons.load(Ordering::Relaxed))
    }

    /// Published slots not yet released.
    #[inline]
    pub fn avail(&self) -> u32 {
        let cons = self.ring.cons.load(Ordering::Relaxed);
        let prod = self.ring.prod.load(Ordering::Acquire);
        prod.wrapping_sub(cons) as u32
    }

    /// Bytes of the slot at `cur` that an earlier partial read delivered.
    #[inline]
    pub fn resume_offset(&self) -> u32 {
        self.resume
    }

    #[inline]
    pub(crate) fn set_resume_offset(&mut self, off: u32) {
        self.resume = off;
    }

    /// Reserve `n` published slots starting at `cur`.
    pub fn reserve(&mut self, n: u32) -> Result<Reservation> {
        let avail = self.avail();
        if avail < n {
            return Err(RingError::InsufficientSlots { needed: n, avail });
        }
        Ok(Reservation {
            start: self.ring.cons.load(Ordering::Relaxed),
            len: n,
            capacity: self.ring.capacity,
            ring: self.ring.ptr_id(),
        })
    }

    /// Slot `index`, if it lies inside the consumer's window.
    pub fn slot_at(&self, index: u32) -> Option<SlotRef<'_>> {
        if index >= self.ring.capacity {
            return None;
        }
        let cons = self.ring.cons.load(Ordering::Relaxed);
        if self.ring.rel(cons, index) >= self.avail() {
            return None;
        }
        // Safety: slot is in [cons, prod), published with Release and
        // observed through the Acquire in avail().
        unsafe {
            let meta = *self.ring.slots[index as usize].get();
            let buf = self.ring.arena.buf(meta.buf_idx);
            Some(SlotRef { meta, buf })
        }
    }

    /// Release the first `used` slots of `res` back to the producer.
    ///
    /// The last released slot gets `patch` applied and `MOREFRAG` cleared.
    /// Releasing also drops any resume offset.
    pub fn commit(&mut self, res: Reservation, used: u32, patch: FlagsPatch) -> Result<u32> {
        let cons = self.ring.cons.load(Ordering::Relaxed);
        if res.ring != self.ring.ptr_id() || res.start != cons {
            return Err(RingError::StaleReservation);
        }
        let used = used.min(res.len);
        if used == 0 {
            return Ok(0);
        }
        let last = res.index(used - 1);
        // Safety: still consumer-owned until the store below.
        unsafe {
            let meta = &mut *self.ring.slots[last as usize].get();
            meta.flags = patch.apply(meta.flags);
        }
        self.resume = 0;
        self.ring.cons.store(cons + used as u64, Ordering::Release);
        Ok(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ring(cap: u32, buf_size: usize) -> (ProducerHandle, ConsumerHandle) {
        let arena = Arc::new(BufferArena::new(cap, buf_size).unwrap());
        Ring::new(cap, arena, 0).unwrap()
    }

    fn fill(p: &mut ProducerHandle, n: u32, tag: u8) {
        let res = p.reserve(n).unwrap();
        for i in 0..n {
            let mut s = p.slot_at(res.index(i)).unwrap();
            s.buf_mut()[0] = tag.wrapping_add(i as u8);
            s.set_len(1);
            s.set_flags(SlotFlags::empty());
        }
        assert_eq!(p.commit(res, n, FlagsPatch::NONE).unwrap(), n);
    }

    #[test]
    fn test_initial_state() {
        let (p, c) = ring(4, 64);
        assert_eq!(p.cur(), 0);
        assert_eq!(p.avail(), 4);
        assert_eq!(c.cur(), 0);
        assert_eq!(c.avail(), 0);
    }

    #[test]
    fn test_reserve_does_not_mutate() {
        let (mut p, c) = ring(4, 64);
        let res = p.reserve(3).unwrap();
        assert_eq!(res.len(), 3);
        assert_eq!(p.cur(), 0);
        assert_eq!(p.avail(), 4);
        drop(res);
        assert_eq!(c.avail(), 0);
    }

    #[test]
    fn test_reserve_insufficient() {
        let (mut p, _c) = ring(4, 64);
        fill(&mut p, 3, 0);
        assert_eq!(
            p.reserve(2).unwrap_err(),
            RingError::InsufficientSlots { needed: 2, avail: 1 }
        );
        assert_eq!(p.avail(), 1);
    }

    #[test]
    fn test_commit_closes_last_slot() {
        let (mut p, c) = ring(4, 64);
        let res = p.reserve(2).unwrap();
        for i in 0..2 {
            p.slot_at(res.index(i)).unwrap().set_flags(SlotFlags::MOREFRAG);
        }
        p.commit(res, 2, FlagsPatch::set(SlotFlags::REPORT)).unwrap();
        assert!(c.slot_at(0).unwrap().more_frag());
        let last = c.slot_at(1).unwrap();
        assert!(!last.more_frag());
        assert!(last.flags().contains(SlotFlags::REPORT));
    }

    #[test]
    fn test_commit_fewer_than_reserved() {
        let (mut p, c) = ring(8, 64);
        let res = p.reserve(5).unwrap();
        assert_eq!(p.commit(res, 2, FlagsPatch::NONE).unwrap(), 2);
        assert_eq!(p.cur(), 2);
        assert_eq!(c.avail(), 2);
    }

    #[test]
    fn test_stale_reservation_rejected() {
        let (mut p, _c) = ring(8, 64);
        let a = p.reserve(1).unwrap();
        let b = p.reserve(1).unwrap();
        p.commit(a, 1, FlagsPatch::NONE).unwrap();
        assert_eq!(p.commit(b, 1, FlagsPatch::NONE), Err(RingError::StaleReservation));

        let (mut other, _oc) = ring(8, 64);
        let foreign = other.reserve(1).unwrap();
        assert_eq!(p.commit(foreign, 1, FlagsPatch::NONE), Err(RingError::StaleReservation));
    }

    #[test]
    fn test_slot_at_window() {
        let (mut p, mut c) = ring(4, 64);
        assert!(c.slot_at(0).is_none());
        fill(&mut p, 2, 10);
        // Producer window is now [2, 4), consumer window [0, 2).
        assert!(p.slot_at(0).is_none());
        assert!(p.slot_at(2).is_some());
        assert!(c.slot_at(1).is_some());
        assert!(c.slot_at(2).is_none());
        assert!(c.slot_at(9).is_none());

        let res = c.reserve(2).unwrap();
        assert_eq!(c.slot_at(res.index(1)).unwrap().payload(), &[11]);
        c.commit(res, 2, FlagsPatch::NONE).unwrap();
        assert!(p.slot_at(0).is_some());
    }

    #[test]
    fn test_wrap_around_boundary() {
        let (mut p, mut c) = ring(4, 64);
        for round in 0..5u8 {
            fill(&mut p, 3, round * 10);
            assert_eq!(c.avail(), 3);
            let res = c.reserve(3).unwrap();
            let first = c.slot_at(res.index(0)).unwrap().payload()[0];
            assert_eq!(first, round * 10);
            c.commit(res, 3, FlagsPatch::NONE).unwrap();
            assert_eq!(p.avail(), 4);
            assert_eq!(p.cur(), ((round as u32 + 1) * 3) % 4);
            assert_eq!(c.cur(), p.cur());
        }
    }

    #[test]
    fn test_full_ring_then_one() {
        let (mut p, mut c) = ring(4, 64);
        fill(&mut p, 4, 0);
        assert_eq!(p.avail(), 0);
        assert_eq!(p.cur(), 0);
        assert_eq!(c.avail(), 4);
        let res = c.reserve(1).unwrap();
        c.commit(res, 1, FlagsPatch::NONE).unwrap();
        assert_eq!(p.avail(), 1);
        assert!(p.slot_at(0).is_some());
        assert!(p.slot_at(1).is_none());
    }

    #[test]
    fn test_reset() {
        let (mut p, mut c) = ring(4, 64);
        fill(&mut p, 3, 0);
        c.set_resume_offset(5);
        Ring::reset(&mut p, &mut c).unwrap();
        assert_eq!(p.cur(), 0);
        assert_eq!(p.avail(), 4);
        assert_eq!(c.avail(), 0);
        assert_eq!(c.resume_offset(), 0);
        let res = p.reserve(1).unwrap();
        let s = p.slot_at(res.index(0)).unwrap();
        assert_eq!(s.len(), 0);
        assert_eq!(s.flags(), SlotFlags::empty());

        let (mut p2, _c2) = ring(4, 64);
        assert_eq!(Ring::reset(&mut p2, &mut c), Err(RingError::HandleMismatch));
    }

    #[test]
    fn test_rejects_out_of_arena() {
        let arena = Arc::new(BufferArena::new(4, 64).unwrap());
        assert!(Ring::new(4, Arc::clone(&arena), 1).is_err());
        assert!(Ring::new(0, Arc::clone(&arena), 0).is_err());
        assert!(Ring::new(2, arena, 2).is_ok());
    }

    #[test]
    fn test_spsc_threads() {
        let (mut p, mut c) = ring(16, 8);
        const N: u64 = 20_000;

        let producer = std::thread::spawn(move || {
            let mut seq = 0u64;
            while seq < N {
                let Ok(res) = p.reserve(1) else {
                    std::hint::spin_loop();
                    continue;
                };
                let mut s = p.slot_at(res.index(0)).unwrap();
                s.buf_mut()[..8].copy_from_slice(&seq.to_le_bytes());
                s.set_len(8);
                p.commit(res, 1, FlagsPatch::NONE).unwrap();
                seq += 1;
            }
        });

        let mut expect = 0u64;
        while expect < N {
            let Ok(res) = c.reserve(1) else {
                std::hint::spin_loop();
                continue;
            };
            let got = {
                let s = c.slot_at(res.index(0)).unwrap();
                u64::from_le_bytes(s.payload().try_into().unwrap())
            };
            assert_eq!(got, expect);
            c.commit(res, 1, FlagsPatch::NONE).unwrap();
            expect += 1;
        }
        producer.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_commit_advances_exactly(cap in 1u32..64, ops in prop::collection::vec(0u32..64, 1..40)) {
            let (mut p, mut c) = ring(cap, 8);
            for n in ops {
                let n = n % (cap + 1);
                let before_cur = p.cur();
                let before_avail = p.avail();
                if n <= before_avail {
                    let res = p.reserve(n).unwrap();
                    p.commit(res, n, FlagsPatch::NONE).unwrap();
                    prop_assert_eq!(p.cur(), (before_cur + n) % cap);
                    prop_assert_eq!(p.avail(), before_avail - n);
                } else {
                    prop_assert!(p.reserve(n).is_err());
                    prop_assert_eq!(p.cur(), before_cur);
                }
                // Drain everything so the next op starts from a full window.
                let k = c.avail();
                let ccur = c.cur();
                let res = c.reserve(k).unwrap();
                c.commit(res, k, FlagsPatch::NONE).unwrap();
                prop_assert_eq!(c.cur(), (ccur + k) % cap);
                prop_assert_eq!(p.avail(), cap);
            }
        }
    }
}
