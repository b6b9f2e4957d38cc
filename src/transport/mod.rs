//! Transport layer for GAIA communication.
//!
//! A [`Transport`] is the connected channel a session writes to. Bytes
//! received from the device are delivered separately, on the
//! `mpsc::Receiver<Bytes>` handed to the session alongside the transport.
//! Concrete BLE and accessory transports live outside this crate; the
//! in-memory [`memory`] transport is provided for tests and demos.

pub mod memory;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::connection::ConnectionKind;
use crate::error::Result;

/// Trait for connected transport implementations.
pub trait Transport: Send {
    /// Kind of link this transport runs over.
    fn kind(&self) -> ConnectionKind;

    /// Writes already-framed bytes to the device.
    fn send(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Closes the link.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

pub use memory::{MemoryPeer, MemoryTransport};
