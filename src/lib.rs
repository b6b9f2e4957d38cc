//! # gaia
//!
//! Client-side protocol engine for GAIA, the command/notification protocol
//! spoken by Bluetooth audio accessories.
//!
//! The crate encodes and decodes the packet formats, frames packets for
//! stream links, paces outgoing commands behind a single outstanding
//! acknowledgement, and routes replies and notifications to per-feature
//! plugins.
//!
//! ## Features
//!
//! - Legacy and bit-packed packet codecs
//! - Stream framing with optional checksum and length extension
//! - Command queue with a 5 second acknowledgement timeout
//! - Per-feature plugins created from a registry
//! - Typed event bus built on Tokio broadcast channels
//!
//! ## Quick Start
//!
//! ```no_run
//! use gaia::{
//!     ConnectionKind, DeviceIdentity, EventBus, FeatureDescriptor, FeatureId, Message,
//!     MemoryTransport, OutboundChannel, Plugin, PluginRegistry, Session, SessionConfig,
//! };
//!
//! struct Battery {
//!     channel: OutboundChannel,
//! }
//!
//! impl Plugin for Battery {
//!     fn feature(&self) -> FeatureId {
//!         FeatureId::Battery
//!     }
//!
//!     fn start(&mut self) {
//!         if let Err(e) = self.channel.send_command(FeatureId::Battery, 0x01, Vec::new()) {
//!             eprintln!("battery request failed: {e}");
//!         }
//!     }
//!
//!     fn stop(&mut self) {}
//!
//!     fn on_message(&mut self, message: &Message) {
//!         println!("battery: {message:?}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gaia::Error> {
//!     let mut registry = PluginRegistry::new();
//!     registry.register(FeatureId::Battery, |_version, _device, channel, _bus| {
//!         Box::new(Battery { channel })
//!     });
//!
//!     let (transport, incoming, _peer) = MemoryTransport::pair(ConnectionKind::Ble);
//!     let mut session = Session::start(
//!         DeviceIdentity::new("AA:BB:CC:DD:EE:FF", ConnectionKind::Ble),
//!         transport,
//!         incoming,
//!         &registry,
//!         &[FeatureDescriptor::new(FeatureId::Battery, 1)],
//!         EventBus::default(),
//!         SessionConfig::default(),
//!     );
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Byte order helpers, packet codecs and stream framing
//! - [`queue`] - Flow-controlled command queue
//! - [`connection`] - Device discovery and connection sources
//! - [`transport`] - Connected links (an in-memory one is included)
//! - [`plugin`] - Per-feature plugins and their registry
//! - [`event`] - Typed event bus
//! - [`session`] - Per-device task tying the above together

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod plugin;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::SessionConfig;
pub use connection::{
    ConnectionEvent, ConnectionKind, ConnectionSource, Device, DeviceIdentity, DeviceList,
    DeviceState,
};
pub use error::{Error, FrameError, Result};
pub use event::{EventBus, SessionEvent, Subscription, SubscriptionHandle};
pub use plugin::{OutboundChannel, Plugin, PluginRegistry};
pub use protocol::{
    FeatureDescriptor, FeatureId, FrameDecoder, Framing, GaiaPacket, LegacyPacket, Message,
    Packet, PacketFormat, Reason, StreamFrame,
};
pub use queue::{ACK_TIMEOUT, CommandQueue, QueueObserver, QueuedCommand};
pub use session::{Session, SessionHandle};
pub use transport::{MemoryPeer, MemoryTransport, Transport};
