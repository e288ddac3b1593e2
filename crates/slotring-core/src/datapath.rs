//! Underlying datapath abstraction.
//!
//! A `Datapath` is the network device the adapter is attached to. The
//! adapter asks it for ring dimensions once at attach time and hands it
//! outbound frames from tx sync.
//!
//! # Implementors
//!
//! - `LoopbackDatapath` (slotring crate): in-process, feeds transmitted
//!   frames back into a dispatch table. Used by tests and the smoke tool.
//! - Host NIC bindings live with the platform integration.

/// Result of handing one frame to the datapath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmitStatus {
    /// Frame accepted for transmission.
    Success,
    /// Frame dropped by queueing discipline or a full device queue.
    Dropped,
    /// Hard error from the transmit path (driver-specific code).
    Error(i32),
}

/// The device under the adapter.
///
/// **Contract:**
/// - `transmit()` must NEVER block. A frame is either accepted whole or
///   rejected whole.
/// - `ring_lengths()` / `queue_counts()` are called once at attach.
pub trait Datapath: Send + Sync {
    /// Transmit one frame on `queue`.
    fn transmit(&self, queue: u16, frame: &[u8]) -> XmitStatus;

    /// Current device ring lengths `(tx, rx)`, if the device reports them.
    fn ring_lengths(&self) -> Option<(u32, u32)> {
        None
    }

    /// Number of hardware `(tx, rx)` queues.
    fn queue_counts(&self) -> (u16, u16) {
        (1, 1)
    }

    /// Device name, for diagnostics.
    fn name(&self) -> &str {
        "unknown"
    }
}
