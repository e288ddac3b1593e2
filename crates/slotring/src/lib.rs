//! # slotring — zero-copy packet rings over a datapath
//!
//! Default implementations of the `slotring-core` traits plus the ring
//! machinery itself:
//!
//! | Module       | Provides                                               |
//! |--------------|--------------------------------------------------------|
//! | `arena`      | `BufferArena`: mmap-backed fixed-size buffers           |
//! | `ring`       | `Ring`, `ProducerHandle`, `ConsumerHandle`              |
//! | `transfer`   | scatter/gather `send` / `receive` over ring slots       |
//! | `mitigation` | `MitigationTimer`: coalesced receive notifications      |
//! | `dispatch`   | `DispatchTable`: swappable receive handler              |
//! | `ingress`    | `IngressCapture`: intercepted frames → RX ring          |
//! | `egress`     | `EgressAdapter`: TX ring → datapath                     |
//! | `adapter`    | `Adapter`: attach, sync, interception, detach           |
//! | `socket`     | `RingSocket`: socket-style front end                    |
//! | `device`     | `RingDevice`: descriptor-style front end                |
//! | `loopback`   | `LoopbackDatapath`: in-process datapath                 |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use slotring::{Adapter, AdapterConfig, LoopbackDatapath, RingSocket};
//!
//! let lb = Arc::new(LoopbackDatapath::new("lo0"));
//! let adapter = Adapter::attach("lo0", lb.clone(), lb, slotring::default_notifier()?,
//!                               AdapterConfig::from_env())?;
//! adapter.enable_interception()?;
//!
//! let sock = RingSocket::bind(&adapter)?;
//! sock.send(&[&b"hello"[..]][..])?;
//! let mut buf = [0u8; 64];
//! let got = sock.receive(&mut [&mut buf[..]][..])?;
//! ```

pub mod adapter;
pub mod arena;
pub mod condvar_notifier;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod egress;
pub mod ingress;
pub mod loopback;
pub mod mitigation;
pub mod ring;
pub mod socket;
pub mod transfer;

#[cfg(target_os = "linux")]
pub mod eventfd_notifier;
#[cfg(target_os = "linux")]
pub mod remote;

use std::sync::Arc;

use slotring_core::error::Result;
use slotring_core::notifier::Notifier;

pub use adapter::{Adapter, AdapterInfo, AdapterStats, Direction, Readiness};
pub use arena::BufferArena;
pub use condvar_notifier::CondvarNotifier;
pub use config::AdapterConfig;
pub use device::{DeviceCmd, DeviceReply, RingDevice};
pub use dispatch::DispatchTable;
pub use egress::{EgressAdapter, EgressOutcome, TxReport};
pub use ingress::IngressCapture;
pub use loopback::LoopbackDatapath;
pub use mitigation::{MitigationState, MitigationTimer};
pub use ring::{ConsumerHandle, ProducerHandle, Reservation, Ring};
pub use socket::RingSocket;
pub use transfer::{Received, SendOptions};

#[cfg(target_os = "linux")]
pub use eventfd_notifier::EventFdNotifier;
#[cfg(target_os = "linux")]
pub use remote::RemoteFragments;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Platform notifier: eventfd.
        pub type DefaultNotifier = EventFdNotifier;

        fn make_default() -> Result<DefaultNotifier> {
            EventFdNotifier::create()
        }
    } else {
        /// Platform notifier: condvar.
        pub type DefaultNotifier = CondvarNotifier;

        fn make_default() -> Result<DefaultNotifier> {
            Ok(CondvarNotifier::new())
        }
    }
}

/// The platform's default notifier, ready to hand to `Adapter::attach`.
pub fn default_notifier() -> Result<Arc<DefaultNotifier>> {
    make_default().map(Arc::new)
}

/// Same, type-erased.
pub fn default_notifier_dyn() -> Result<Arc<dyn Notifier>> {
    let n: Arc<dyn Notifier> = default_notifier()?;
    Ok(n)
}
