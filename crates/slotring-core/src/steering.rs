//! Receive steering: who gets frames arriving on a device queue.
//!
//! The host datapath normally passes received frames up to its own stack.
//! While the adapter is in use the receive dispatch for a ring index is
//! swapped to an adapter-owned `RxHandler`, and swapped back on release.
//!
//! # Implementors
//!
//! - `DispatchTable`-backed hooks (slotring crate): per-adapter handler
//!   slot exchanged atomically.
//! - Platform hooks (rx handler registration, queue selection override)
//!   live with the platform integration.

use std::sync::Arc;

use crate::error::Result;

/// What a handler did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxVerdict {
    /// Frame taken; the host stack must not see it.
    Consumed,
    /// Frame not taken; deliver it normally.
    Pass,
}

/// Receives frames from the datapath.
///
/// **Contract:**
/// - `handle()` must NEVER block. It runs on the datapath's context.
pub trait RxHandler: Send + Sync {
    fn handle(&self, queue: u16, frame: &[u8]) -> RxVerdict;
}

/// Enable/disable toggle for receive interception.
///
/// **Contract:**
/// - Callers hold the adapter's exclusive configuration lock.
/// - After `disable()` returns, `handler` is no longer reachable from the
///   datapath and no dispatch through it is still running.
pub trait SteeringHook: Send + Sync {
    /// Route frames for `ring` to `handler`.
    fn enable(&self, ring: u16, handler: Arc<dyn RxHandler>) -> Result<()>;

    /// Restore the handler that was active before `enable()`.
    fn disable(&self, ring: u16) -> Result<()>;
}
