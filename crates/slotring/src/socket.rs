//! `RingSocket` — socket-style scatter/gather access to an adapter.
//!
//! A socket does not keep its adapter alive. Once the adapter is detached
//! or dropped every call fails with `AdapterUnavailable`.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};

use slotring_core::error::{Result, RingError};
use slotring_core::sg::{SgSink, SgSource};

use crate::adapter::Adapter;
use crate::transfer::{Received, SendOptions};

pub struct RingSocket {
    adapter: Weak<Adapter>,
    tx_ring: AtomicU16,
}

impl RingSocket {
    /// Become the adapter's socket owner. `Busy` if another socket holds it.
    pub fn bind(adapter: &Arc<Adapter>) -> Result<Self> {
        adapter.claim_socket()?;
        Ok(Self {
            adapter: Arc::downgrade(adapter),
            tx_ring: AtomicU16::new(0),
        })
    }

    /// Send on TX ring `ring` instead of ring 0.
    pub fn set_tx_ring(&self, ring: u16) -> Result<()> {
        let adapter = self.adapter()?;
        if ring >= adapter.info().tx_rings {
            return Err(RingError::InvalidRing(ring));
        }
        self.tx_ring.store(ring, Ordering::Relaxed);
        Ok(())
    }

    fn adapter(&self) -> Result<Arc<Adapter>> {
        match self.adapter.upgrade() {
            Some(a) if a.is_alive() => Ok(a),
            _ => Err(RingError::AdapterUnavailable),
        }
    }

    /// Send `src` as one packet. Returns the full byte count or an error;
    /// never a partial count. On `InsufficientSlots` the adapter's write
    /// notifier fires once tx sync frees slots on this ring.
    pub fn send<S: SgSource + ?Sized>(&self, src: &S) -> Result<usize> {
        let ring = self.tx_ring.load(Ordering::Relaxed);
        self.adapter()?.send(ring, src, SendOptions::default())
    }

    /// Receive the next packet, or what fits of it.
    pub fn receive<D: SgSink + ?Sized>(&self, dst: &mut D) -> Result<Received> {
        self.adapter()?.receive(dst)
    }
}

impl Drop for RingSocket {
    fn drop(&mut self) {
        if let Some(a) = self.adapter.upgrade() {
            a.release_socket();
        }
    }
}
