//! # slotring-core — Trait and type definitions for slotring
//!
//! This crate defines the boundaries the slotring adapter depends on:
//! the slot descriptor format, the caller-side scatter/gather model, and
//! one trait per external collaborator. It contains no ring logic.
//!
//! | Trait         | Collaborator                               |
//! |---------------|--------------------------------------------|
//! | `Datapath`    | device transmit path, ring/queue discovery |
//! | `SteeringHook`| receive dispatch swap for a ring index     |
//! | `RxHandler`   | receiver of intercepted frames             |
//! | `Notifier`    | "new work available" wakeup                |
//! | `SgSource`    | caller fragments for send                  |
//! | `SgSink`      | caller fragments for receive               |

pub mod error;
pub mod slot;
pub mod sg;
pub mod datapath;
pub mod steering;
pub mod notifier;
pub mod kprint;
pub mod env;

pub use error::{Result, RingError};
pub use slot::{slots_for, FlagsPatch, SlotFlags, SlotMeta};
pub use sg::{CopyFault, SgSink, SgSource};
pub use datapath::{Datapath, XmitStatus};
pub use steering::{RxHandler, RxVerdict, SteeringHook};
pub use notifier::Notifier;
