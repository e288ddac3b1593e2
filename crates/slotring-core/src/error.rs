//! slotring error types.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// Not enough free slots on the producer side. Retry after a sync.
    InsufficientSlots { needed: u32, avail: u32 },
    /// Inbound packet ran past the available slots or the caller's buffer.
    /// Receive reports this through `Received::truncated`, never as `Err`.
    TruncatedPacket,
    /// Copy into or out of caller memory failed at this fragment offset.
    MemoryFault { offset: usize },
    /// The adapter behind this handle has been detached.
    AdapterUnavailable,
    /// The adapter's socket is already owned by another handle.
    Busy,
    /// Device handle is not bound to an adapter.
    NotBound,
    /// Ring index out of range for this adapter.
    InvalidRing(u16),
    /// Reservation no longer matches the ring cursor.
    StaleReservation,
    /// Producer and consumer handles belong to different rings.
    HandleMismatch,
    /// Mitigation timer could not be cancelled.
    TimerCancel,
    /// Steering hook refused enable/disable.
    HookFailed(i32),
    /// Adapter configuration rejected at attach.
    InvalidConfig(&'static str),
    /// OS error with errno.
    Os(i32),
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSlots { needed, avail } => {
                write!(f, "insufficient slots: need {}, avail {}", needed, avail)
            }
            Self::TruncatedPacket => write!(f, "truncated packet"),
            Self::MemoryFault { offset } => write!(f, "memory fault at offset {}", offset),
            Self::AdapterUnavailable => write!(f, "adapter unavailable"),
            Self::Busy => write!(f, "adapter busy"),
            Self::NotBound => write!(f, "device not bound to an adapter"),
            Self::InvalidRing(r) => write!(f, "invalid ring index {}", r),
            Self::StaleReservation => write!(f, "stale reservation"),
            Self::HandleMismatch => write!(f, "handles belong to different rings"),
            Self::TimerCancel => write!(f, "mitigation timer cancel failed"),
            Self::HookFailed(e) => write!(f, "steering hook failed: {}", e),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for RingError {}

pub type Result<T> = std::result::Result<T, RingError>;
