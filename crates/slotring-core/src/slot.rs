//! Slot descriptor types shared by every ring user.
//!
//! A slot describes one fragment of a packet: which arena buffer holds
//! the bytes, how many of them are valid, and how the fragment chains to
//! its neighbours.
//!
//! ```text
//!   slot k          slot k+1        slot k+2
//!  ┌──────────┐    ┌──────────┐    ┌──────────┐
//!  │ MOREFRAG │───►│ MOREFRAG │───►│    -     │   one packet
//!  │ HDR      │    │          │    │          │
//!  └──────────┘    └──────────┘    └──────────┘
//! ```

use bitflags::bitflags;

bitflags! {
    /// Per-slot flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SlotFlags: u16 {
        /// Payload continues in the next slot of the same packet.
        const MOREFRAG       = 0x0001;
        /// First slot of a packet, carries an out-of-band header region.
        const HEADER_PRESENT = 0x0002;
        /// Producer asks for a completion report on this slot.
        const REPORT         = 0x0004;
    }
}

/// Slot metadata as stored in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotMeta {
    /// Index into the buffer arena.
    pub buf_idx: u32,
    /// Bytes valid in the buffer.
    pub len: u32,
    pub flags: SlotFlags,
}

impl SlotMeta {
    pub const fn new(buf_idx: u32) -> Self {
        Self { buf_idx, len: 0, flags: SlotFlags::empty() }
    }

    #[inline]
    pub fn more_frag(&self) -> bool {
        self.flags.contains(SlotFlags::MOREFRAG)
    }
}

/// Flag edits applied to the last slot of a committed run.
///
/// `MOREFRAG` is cleared on the last slot regardless of the patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagsPatch {
    pub set: SlotFlags,
    pub clear: SlotFlags,
}

impl FlagsPatch {
    pub const NONE: FlagsPatch = FlagsPatch {
        set: SlotFlags::empty(),
        clear: SlotFlags::empty(),
    };

    pub fn set(flags: SlotFlags) -> Self {
        Self { set: flags, clear: SlotFlags::empty() }
    }

    /// Apply to `flags`, always closing the packet.
    pub fn apply(&self, flags: SlotFlags) -> SlotFlags {
        ((flags | self.set) - self.clear) - SlotFlags::MOREFRAG
    }
}

/// Number of slots of `cap` bytes needed to hold `len` bytes.
#[inline]
pub fn slots_for(len: usize, cap: usize) -> usize {
    if len == 0 {
        0
    } else {
        (len + cap - 1) / cap
    }
}
