//! `RingDevice` — descriptor-file style control of an adapter.
//!
//! Mirrors what a user of a character device would do:
//!
//! ```text
//!   open ─▶ register(adapter) ─▶ ioctl(TxSync | RxSync | GetInfo)
//!                                 map_offset / poll / socket
//!                              ─▶ release
//! ```
//!
//! Slot contents are reached directly through `with_tx_ring` /
//! `with_rx_ring`; the sync commands reconcile the rings with the
//! datapath.

use std::sync::{Arc, Weak};

use slotring_core::error::{Result, RingError};
use slotring_core::kdebug;

use crate::adapter::{Adapter, AdapterInfo, Readiness};
use crate::egress::TxReport;
use crate::ring::{ConsumerHandle, ProducerHandle};
use crate::socket::RingSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCmd {
    /// Transmit pending slots on every TX ring.
    TxSync,
    /// Move captured frames into the RX ring.
    RxSync,
    GetInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceReply {
    Tx(TxReport),
    /// Frames moved into the RX ring.
    Rx(usize),
    Info(AdapterInfo),
}

#[derive(Default)]
pub struct RingDevice {
    bound: Option<Weak<Adapter>>,
    /// Socket this device owns on the bound adapter.
    socket: Option<Arc<RingSocket>>,
}

impl RingDevice {
    pub fn open() -> Self {
        Self::default()
    }

    /// Bind to `adapter`. A device binds once; `Busy` if already bound.
    pub fn register(&mut self, adapter: &Arc<Adapter>) -> Result<()> {
        if self.bound.is_some() {
            return Err(RingError::Busy);
        }
        if !adapter.is_alive() {
            return Err(RingError::AdapterUnavailable);
        }
        kdebug!("device registered to {}", adapter.name());
        self.bound = Some(Arc::downgrade(adapter));
        Ok(())
    }

    fn adapter(&self) -> Result<Arc<Adapter>> {
        let weak = self.bound.as_ref().ok_or(RingError::NotBound)?;
        match weak.upgrade() {
            Some(a) if a.is_alive() => Ok(a),
            _ => Err(RingError::AdapterUnavailable),
        }
    }

    pub fn ioctl(&self, cmd: DeviceCmd) -> Result<DeviceReply> {
        let adapter = self.adapter()?;
        match cmd {
            DeviceCmd::TxSync => {
                let mut total = TxReport::default();
                for ring in 0..adapter.info().tx_rings {
                    total.merge(adapter.tx_sync(ring)?);
                }
                Ok(DeviceReply::Tx(total))
            }
            DeviceCmd::RxSync => Ok(DeviceReply::Rx(adapter.rx_sync(0)?)),
            DeviceCmd::GetInfo => Ok(DeviceReply::Info(adapter.info())),
        }
    }

    /// Socket front end on the bound adapter. Asking again from the same
    /// device returns the same socket; another device gets `Busy` until
    /// this one is released.
    pub fn socket(&mut self) -> Result<Arc<RingSocket>> {
        let adapter = self.adapter()?;
        if let Some(sock) = &self.socket {
            return Ok(Arc::clone(sock));
        }
        let sock = Arc::new(RingSocket::bind(&adapter)?);
        self.socket = Some(Arc::clone(&sock));
        Ok(sock)
    }

    /// Arena address behind a mapping offset, `None` past the end.
    pub fn map_offset(&self, offset: usize) -> Result<Option<*const u8>> {
        Ok(self.adapter()?.map_offset(offset))
    }

    /// Readiness; empty once the adapter is gone.
    pub fn poll(&self) -> Readiness {
        self.adapter().map(|a| a.poll()).unwrap_or(Readiness::empty())
    }

    pub fn with_tx_ring<R>(&self, ring: u16, f: impl FnOnce(&mut ProducerHandle) -> R) -> Result<R> {
        self.adapter()?.with_tx_ring(ring, f)
    }

    pub fn with_rx_ring<R>(&self, f: impl FnOnce(&mut ConsumerHandle) -> R) -> Result<R> {
        self.adapter()?.with_rx_ring(f)
    }

    /// Unbind, giving up the socket claim. The device can be registered
    /// again afterwards.
    pub fn release(&mut self) {
        self.socket = None;
        self.bound = None;
    }
}
