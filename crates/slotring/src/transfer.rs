//! Slot transfer engine — caller fragments ⇄ ring slots.
//!
//! Outbound (`send`) carves each source fragment into slot-sized chunks:
//!
//! ```text
//!  fragments:  [ 5000 bytes              ][ 100 ]
//!  slots:      [2048 M H][2048 M][904 M]  [100  ]      M = MOREFRAG
//!                                                       H = HEADER_PRESENT
//! ```
//!
//! The exact slot count (sum of `ceil(len_i / buf_size)`) is checked
//! before any byte is written; slots are only published by the final
//! commit, so a rejected or faulted send leaves the ring untouched.
//!
//! Inbound (`receive`) walks one packet's `MOREFRAG` chain from `cur` into
//! the destination fragments. It stops at the end of the packet, when the
//! destination is full, or when the ring runs dry mid-packet.
//!
//! # Partial slots
//!
//! If the destination fills in the middle of a slot, that slot is not
//! released. The consumer handle keeps the byte offset and the next
//! `receive` continues from it, so nothing becomes unreachable.

use slotring_core::error::{Result, RingError};
use slotring_core::kwarn_rl;
use slotring_core::sg::{SgSink, SgSource};
use slotring_core::slot::{slots_for, FlagsPatch, SlotFlags};

use crate::ring::{ConsumerHandle, ProducerHandle};

/// Per-send options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Extra flag edits on the packet's last slot.
    pub patch: FlagsPatch,
}

/// Outcome of one `receive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Received {
    /// Bytes copied into the destination.
    pub bytes: usize,
    /// Slots released back to the producer.
    pub slots: u32,
    /// The packet started with `HEADER_PRESENT`.
    pub header: bool,
    /// Destination filled before the packet ended; the rest stays queued.
    pub more: bool,
    /// Ring ran out of slots with the packet still incomplete.
    pub truncated: bool,
}

impl Received {
    /// `TruncatedPacket` when the ring ran dry mid-packet.
    pub fn check(&self) -> Result<usize> {
        if self.truncated {
            Err(RingError::TruncatedPacket)
        } else {
            Ok(self.bytes)
        }
    }
}

/// Slots needed to carry `src` with `buf_size`-byte slots.
pub fn slots_needed<S: SgSource + ?Sized>(src: &S, buf_size: usize) -> usize {
    (0..src.fragment_count())
        .map(|j| slots_for(src.fragment_len(j), buf_size))
        .sum()
}

/// Copy `src` into the producer side as one packet.
///
/// The first slot always carries `HEADER_PRESENT`.
///
/// Returns the total byte count, or `InsufficientSlots` / `MemoryFault`
/// with nothing published. A zero-length source is accepted without
/// consuming slots.
pub fn send<S: SgSource + ?Sized>(
    prod: &mut ProducerHandle,
    src: &S,
    opts: SendOptions,
) -> Result<usize> {
    let total = src.total_len();
    if total == 0 {
        return Ok(0);
    }

    let buf_size = prod.buf_size();
    let needed = slots_needed(src, buf_size);
    let needed = u32::try_from(needed).map_err(|_| RingError::InsufficientSlots {
        needed: u32::MAX,
        avail: prod.avail(),
    })?;
    let res = prod.reserve(needed)?;

    let mut k = 0u32;
    let mut pos = 0usize;
    let mut first_flags = SlotFlags::HEADER_PRESENT;

    for j in 0..src.fragment_count() {
        let frag_len = src.fragment_len(j);
        let mut off = 0usize;
        while off < frag_len {
            let chunk = (frag_len - off).min(buf_size);
            let mut slot = prod
                .slot_at(res.index(k))
                .ok_or(RingError::StaleReservation)?;
            src.read_fragment(j, off, &mut slot.buf_mut()[..chunk])
                .map_err(|_| RingError::MemoryFault { offset: pos })?;
            slot.set_len(chunk);
            slot.set_flags(SlotFlags::MOREFRAG | first_flags);
            first_flags = SlotFlags::empty();

            k += 1;
            off += chunk;
            pos += chunk;
        }
    }

    debug_assert_eq!(k, needed);
    prod.commit(res, k, opts.patch)?;
    Ok(total)
}

/// Copy the packet at the consumer cursor into `dst`.
///
/// Never fails for short buffers or truncated packets; those are reported
/// in `Received`. A copy fault releases only the slots fully copied before
/// it and returns `MemoryFault`.
pub fn receive<D: SgSink + ?Sized>(cons: &mut ConsumerHandle, dst: &mut D) -> Result<Received> {
    let mut out = Received::default();

    let avail = cons.avail();
    if avail == 0 || dst.total_len() == 0 {
        return Ok(out);
    }
    let res = cons.reserve(avail)?;

    let nfrags = dst.fragment_count();
    let mut j = 0usize;
    while j < nfrags && dst.fragment_len(j) == 0 {
        j += 1;
    }
    let mut frag_off = 0usize;

    let mut k = 0u32;
    let mut slot_off = cons.resume_offset() as usize;
    out.header = slot_off == 0;

    loop {
        let (slot_len, more_frag, fault) = {
            let slot = cons
                .slot_at(res.index(k))
                .ok_or(RingError::StaleReservation)?;
            if k == 0 {
                out.header &= slot.flags().contains(SlotFlags::HEADER_PRESENT);
            }
            let payload = slot.payload();
            let start = slot_off.min(payload.len());
            let copy = (payload.len() - start).min(dst.fragment_len(j) - frag_off);
            let fault = if copy > 0 {
                dst.write_fragment(j, frag_off, &payload[start..start + copy])
                    .is_err()
            } else {
                false
            };
            if !fault {
                slot_off = start + copy;
                frag_off += copy;
                out.bytes += copy;
            }
            (payload.len(), slot.more_frag(), fault)
        };

        if fault {
            // Whole slots before this one are done; this one is not.
            let offset = out.bytes;
            cons.commit(res, k, FlagsPatch::NONE)?;
            return Err(RingError::MemoryFault { offset });
        }

        if slot_off >= slot_len {
            k += 1;
            slot_off = 0;
            if !more_frag {
                break;
            }
            if k == avail {
                out.truncated = true;
                kwarn_rl!(5, "ran out of slots with a pending incomplete packet ({} bytes)", out.bytes);
                break;
            }
        }

        if frag_off == dst.fragment_len(j) {
            j += 1;
            frag_off = 0;
            while j < nfrags && dst.fragment_len(j) == 0 {
                j += 1;
            }
            if j == nfrags {
                out.more = true;
                break;
            }
        }
    }

    out.slots = cons.commit(res, k, FlagsPatch::NONE)?;
    cons.set_resume_offset(slot_off as u32);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::BufferArena;
    use crate::ring::Ring;
    use slotring_core::sg::CopyFault;
    use std::sync::Arc;

    fn ring(cap: u32, buf_size: usize) -> (ProducerHandle, ConsumerHandle) {
        let arena = Arc::new(BufferArena::new(cap, buf_size).unwrap());
        Ring::new(cap, arena, 0).unwrap()
    }

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 7 + 3) as u8).collect()
    }

    /// Source whose fragment `bad` faults on every read.
    struct FaultySource {
        frags: Vec<Vec<u8>>,
        bad: usize,
    }

    impl SgSource for FaultySource {
        fn fragment_count(&self) -> usize {
            self.frags.len()
        }
        fn fragment_len(&self, idx: usize) -> usize {
            self.frags[idx].len()
        }
        fn read_fragment(&self, idx: usize, off: usize, dst: &mut [u8]) -> std::result::Result<(), CopyFault> {
            if idx == self.bad {
                return Err(CopyFault);
            }
            dst.copy_from_slice(&self.frags[idx][off..off + dst.len()]);
            Ok(())
        }
    }

    /// Sink that faults once `limit` bytes have been written.
    struct FaultySink {
        buf: Vec<u8>,
        limit: usize,
        written: usize,
    }

    impl SgSink for FaultySink {
        fn fragment_count(&self) -> usize {
            1
        }
        fn fragment_len(&self, _idx: usize) -> usize {
            self.buf.len()
        }
        fn write_fragment(&mut self, _idx: usize, off: usize, src: &[u8]) -> std::result::Result<(), CopyFault> {
            if self.written + src.len() > self.limit {
                return Err(CopyFault);
            }
            self.buf[off..off + src.len()].copy_from_slice(src);
            self.written += src.len();
            Ok(())
        }
    }

    #[test]
    fn test_round_trip_chains_slots() {
        let (mut p, mut c) = ring(8, 2048);
        let data = pattern(5000);
        assert_eq!(send(&mut p, &[&data[..]][..], SendOptions::default()).unwrap(), 5000);
        assert_eq!(c.avail(), 3);

        let flags: Vec<bool> = (0..3).map(|i| c.slot_at(i).unwrap().more_frag()).collect();
        assert_eq!(flags, [true, true, false]);
        assert_eq!(c.slot_at(2).unwrap().len(), 5000 - 4096);

        let mut out = vec![0u8; 6000];
        let got = receive(&mut c, &mut [&mut out[..]][..]).unwrap();
        assert_eq!(got.bytes, 5000);
        assert_eq!(got.slots, 3);
        assert!(!got.more && !got.truncated);
        assert_eq!(&out[..5000], &data[..]);
        assert_eq!(p.avail(), 8);
    }

    #[test]
    fn test_5000_bytes_over_four_2048_slots() {
        let (mut p, _c) = ring(4, 2048);
        let data = pattern(5000);
        assert_eq!(send(&mut p, &[&data[..]][..], SendOptions::default()).unwrap(), 5000);
        assert_eq!(p.avail(), 1);
        assert_eq!(p.cur(), 3);
    }

    #[test]
    fn test_insufficient_slots_is_all_or_nothing() {
        let (mut p, c) = ring(4, 2048);
        let data = pattern(2048 * 4 + 1);
        assert_eq!(
            send(&mut p, &[&data[..]][..], SendOptions::default()),
            Err(RingError::InsufficientSlots { needed: 5, avail: 4 })
        );
        assert_eq!(p.avail(), 4);
        assert_eq!(p.cur(), 0);
        assert_eq!(c.avail(), 0);
    }

    #[test]
    fn test_zero_avail_rejects() {
        let (mut p, _c) = ring(2, 64);
        send(&mut p, &[&pattern(128)[..]][..], SendOptions::default()).unwrap();
        assert_eq!(p.avail(), 0);
        assert!(matches!(
            send(&mut p, &[&b"x"[..]][..], SendOptions::default()),
            Err(RingError::InsufficientSlots { needed: 1, avail: 0 })
        ));
        // Zero bytes is still fine with no room.
        assert_eq!(send(&mut p, &[&b""[..]][..], SendOptions::default()).unwrap(), 0);
    }

    #[test]
    fn test_empty_send_consumes_nothing() {
        let (mut p, c) = ring(4, 64);
        let none: [&[u8]; 0] = [];
        assert_eq!(send(&mut p, &none[..], SendOptions::default()).unwrap(), 0);
        assert_eq!(send(&mut p, &[&b""[..], &b""[..]][..], SendOptions::default()).unwrap(), 0);
        assert_eq!(p.avail(), 4);
        assert_eq!(c.avail(), 0);
    }

    #[test]
    fn test_fragments_carved_independently() {
        let (mut p, c) = ring(8, 64);
        let a = pattern(100);
        let b = pattern(10);
        // 100 → 64 + 36, 10 → 10: three slots, not ceil(110/64) = 2.
        send(&mut p, &[&a[..], &b[..]][..], SendOptions::default()).unwrap();
        assert_eq!(c.avail(), 3);
        let lens: Vec<u32> = (0..3).map(|i| c.slot_at(i).unwrap().len()).collect();
        assert_eq!(lens, [64, 36, 10]);
        assert!(c.slot_at(0).unwrap().flags().contains(SlotFlags::HEADER_PRESENT));
        assert!(!c.slot_at(1).unwrap().flags().contains(SlotFlags::HEADER_PRESENT));
        assert!(!c.slot_at(2).unwrap().flags().contains(SlotFlags::HEADER_PRESENT));
        assert!(!c.slot_at(2).unwrap().more_frag());
    }

    #[test]
    fn test_send_fault_publishes_nothing() {
        let (mut p, c) = ring(8, 64);
        let src = FaultySource { frags: vec![pattern(100), pattern(30)], bad: 1 };
        assert_eq!(
            send(&mut p, &src, SendOptions::default()),
            Err(RingError::MemoryFault { offset: 100 })
        );
        assert_eq!(p.avail(), 8);
        assert_eq!(c.avail(), 0);
    }

    #[test]
    fn test_receive_empty_ring_and_zero_capacity() {
        let (mut p, mut c) = ring(4, 64);
        let mut out = [0u8; 16];
        assert_eq!(receive(&mut c, &mut [&mut out[..]][..]).unwrap(), Received::default());

        send(&mut p, &[&b"abc"[..]][..], SendOptions::default()).unwrap();
        let mut empty: [&mut [u8]; 0] = [];
        assert_eq!(receive(&mut c, &mut empty[..]).unwrap().bytes, 0);
        let mut zero = [0u8; 0];
        assert_eq!(receive(&mut c, &mut [&mut zero[..]][..]).unwrap().bytes, 0);
        assert_eq!(c.avail(), 1);
        assert_eq!(c.cur(), 0);
    }

    #[test]
    fn test_receive_one_packet_per_call() {
        let (mut p, mut c) = ring(8, 64);
        send(&mut p, &[&b"first"[..]][..], SendOptions::default()).unwrap();
        send(&mut p, &[&b"second"[..]][..], SendOptions::default()).unwrap();

        let mut out = [0u8; 64];
        let got = receive(&mut c, &mut [&mut out[..]][..]).unwrap();
        assert_eq!(&out[..got.bytes], b"first");
        let got = receive(&mut c, &mut [&mut out[..]][..]).unwrap();
        assert_eq!(&out[..got.bytes], b"second");
        assert_eq!(c.avail(), 0);
    }

    #[test]
    fn test_receive_into_many_fragments() {
        let (mut p, mut c) = ring(8, 16);
        let data = pattern(40);
        send(&mut p, &[&data[..]][..], SendOptions::default()).unwrap();

        let mut a = [0u8; 7];
        let mut z = [0u8; 0];
        let mut b = [0u8; 30];
        let mut d = [0u8; 10];
        let got = receive(&mut c, &mut [&mut a[..], &mut z[..], &mut b[..], &mut d[..]][..]).unwrap();
        assert_eq!(got.bytes, 40);
        assert!(!got.more);
        let mut joined = a.to_vec();
        joined.extend_from_slice(&b);
        joined.extend_from_slice(&d[..3]);
        assert_eq!(joined, data);
    }

    #[test]
    fn test_short_destination_resumes_mid_slot() {
        let (mut p, mut c) = ring(8, 64);
        let data = pattern(150); // slots: 64, 64, 22
        send(&mut p, &[&data[..]][..], SendOptions::default()).unwrap();

        let mut out = [0u8; 100];
        let got = receive(&mut c, &mut [&mut out[..]][..]).unwrap();
        assert_eq!(got.bytes, 100);
        assert!(got.more);
        // Slot 0 fully consumed, slot 1 consumed up to byte 36.
        assert_eq!(got.slots, 1);
        assert_eq!(c.cur(), 1);
        assert_eq!(c.resume_offset(), 36);
        assert_eq!(&out[..], &data[..100]);

        let mut rest = [0u8; 100];
        let got = receive(&mut c, &mut [&mut rest[..]][..]).unwrap();
        assert_eq!(got.bytes, 50);
        assert!(!got.more);
        assert!(!got.header);
        assert_eq!(&rest[..50], &data[100..]);
        assert_eq!(c.avail(), 0);
        assert_eq!(c.resume_offset(), 0);
    }

    #[test]
    fn test_destination_full_on_slot_boundary() {
        let (mut p, mut c) = ring(8, 64);
        let data = pattern(100);
        send(&mut p, &[&data[..]][..], SendOptions::default()).unwrap();

        let mut out = [0u8; 64];
        let got = receive(&mut c, &mut [&mut out[..]][..]).unwrap();
        assert_eq!(got.bytes, 64);
        assert!(got.more);
        assert_eq!(got.slots, 1);
        assert_eq!(c.resume_offset(), 0);
    }

    #[test]
    fn test_exact_fit_is_complete() {
        let (mut p, mut c) = ring(8, 64);
        send(&mut p, &[&pattern(128)[..]][..], SendOptions::default()).unwrap();
        let mut out = [0u8; 128];
        let got = receive(&mut c, &mut [&mut out[..]][..]).unwrap();
        assert_eq!(got.bytes, 128);
        assert!(!got.more);
        assert_eq!(got.slots, 2);
    }

    #[test]
    fn test_truncated_when_ring_runs_dry() {
        let (mut p, mut c) = ring(4, 64);
        // A foreign producer publishes a packet's first two slots and
        // leaves MOREFRAG set on the last one.
        let res = p.reserve(2).unwrap();
        for i in 0..2 {
            let mut s = p.slot_at(res.index(i)).unwrap();
            s.buf_mut()[..10].fill(i as u8 + 1);
            s.set_len(10);
            s.set_flags(SlotFlags::MOREFRAG);
        }
        p.commit_open(res, 2).unwrap();

        let mut out = [0u8; 64];
        let got = receive(&mut c, &mut [&mut out[..]][..]).unwrap();
        assert_eq!(got.bytes, 20);
        assert!(got.truncated);
        assert_eq!(got.slots, 2);
        assert_eq!(got.check(), Err(RingError::TruncatedPacket));
        assert_eq!(&out[..20], &[[1u8; 10], [2u8; 10]].concat()[..]);
        assert_eq!(c.avail(), 0);
    }

    #[test]
    fn test_receive_fault_commits_whole_slots_only() {
        let (mut p, mut c) = ring(8, 64);
        send(&mut p, &[&pattern(150)[..]][..], SendOptions::default()).unwrap();

        let mut sink = FaultySink { buf: vec![0; 200], limit: 100, written: 0 };
        assert_eq!(receive(&mut c, &mut sink), Err(RingError::MemoryFault { offset: 64 }));
        assert_eq!(c.cur(), 1);
        assert_eq!(c.avail(), 2);
        assert_eq!(c.resume_offset(), 0);
    }

    #[test]
    fn test_every_packet_starts_with_header() {
        let (mut p, mut c) = ring(4, 2048);
        send(&mut p, &[&pattern(3000)[..]][..], SendOptions::default()).unwrap();
        send(&mut p, &[&b"ack"[..]][..], SendOptions::default()).unwrap();

        assert!(c.slot_at(0).unwrap().flags().contains(SlotFlags::HEADER_PRESENT));
        assert!(!c.slot_at(1).unwrap().flags().contains(SlotFlags::HEADER_PRESENT));
        assert!(c.slot_at(2).unwrap().flags().contains(SlotFlags::HEADER_PRESENT));

        let mut out = [0u8; 4096];
        assert!(receive(&mut c, &mut [&mut out[..]][..]).unwrap().header);
        assert!(receive(&mut c, &mut [&mut out[..]][..]).unwrap().header);
    }

    #[test]
    fn test_chains_across_wraparound_read_in_small_pieces() {
        let (mut p, mut c) = ring(5, 16);
        for round in 0..50usize {
            // 1..=80 bytes: up to all five slots, starting anywhere.
            let len = 1 + (round * 13) % 80;
            let data: Vec<u8> = (0..len).map(|i| (i + round) as u8).collect();
            assert_eq!(send(&mut p, &[&data[..]][..], SendOptions::default()).unwrap(), len);

            let mut got = Vec::new();
            let mut first = true;
            loop {
                let mut piece = [0u8; 7];
                let r = receive(&mut c, &mut [&mut piece[..]][..]).unwrap();
                assert!(!r.truncated, "round {}", round);
                assert_eq!(r.header, first, "round {}", round);
                first = false;
                got.extend_from_slice(&piece[..r.bytes]);
                if !r.more {
                    break;
                }
            }
            assert_eq!(got, data, "round {}", round);
            assert_eq!(p.avail(), 5);
            assert_eq!(c.avail(), 0);
            assert_eq!(c.resume_offset(), 0);
        }
    }
}
