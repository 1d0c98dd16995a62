//! Minimal peer-to-peer data-exchange engine for multi-accelerator systems.
//!
//! `peerlink` moves bulk buffers directly between per-device memory spaces
//! over a peer interconnect, bypassing a general-purpose collective library.
//! Callers drive it with three operations: initialize the engine once,
//! enqueue any number of directed exchanges per device per round, and
//! launch each device's batch on that device's [`Stream`]. Each queued
//! exchange is executed by an independent group of lanes running a
//! lock-free handshake over peer-visible exchange cells, a strided bulk
//! copy written one-sided into the peer's memory, and a completion
//! rendezvous, so once a stream is synchronized both ends of every
//! exchange are known to have landed.
//!
//! Collectives are not primitives here; compose them from repeated
//! point-to-point rounds. A descriptor whose counterpart was never queued
//! on the peer spins forever, by contract.

pub mod config;
pub mod descriptor;
pub mod device;
pub mod engine;
pub mod error;
pub mod exchange;
mod kernel;
pub mod types;

pub use config::LinkConfig;
pub use device::{DenyAllProbe, DeviceBuffer, PeerProbe, Stream, UnifiedProbe};
pub use engine::CommEngine;
pub use error::{LinkError, Result};
pub use types::DeviceId;
