//! Protocol definitions for GAIA communication.
//!
//! This module contains the wire formats and their shared contract:
//! - 16-bit byte order helpers
//! - Legacy fixed-header GATT packets
//! - Bit-packed GATT packets (the current format)
//! - Stream framing for byte-stream transports
//! - Feature identifiers and negotiation helpers
//! - Message classification

pub mod byte_order;
pub mod feature;
pub mod frame;
pub mod legacy;
pub mod message;
pub mod packet;

use bytes::Bytes;

use crate::error::FrameError;

pub use byte_order::{Endian, decode16, encode16};
pub use feature::{
    FeatureDescriptor, FeatureId, SupportedFeatures, parse_supported_features,
    supported_features_request,
};
pub use frame::{
    FrameDecoder, MAX_PAYLOAD_EXTENSION, MAX_PAYLOAD_NO_EXTENSION, START_OF_FRAME, StreamFrame,
};
pub use legacy::LegacyPacket;
pub use message::Message;
pub use packet::{FeatureSelector, GaiaPacket, REFERENCE_VENDOR_ID, Reason};

/// Contract shared by every wire format.
///
/// Decoding never panics: a malformed buffer yields a [`FrameError`] and
/// the caller drops the bytes.
pub trait Packet: Sized {
    /// Decodes a packet from a complete buffer.
    fn decode(data: &[u8]) -> Result<Self, FrameError>;

    /// Encodes the packet to bytes.
    fn encode(&self) -> Bytes;

    /// Classifies the packet for plugin dispatch.
    fn classify(&self) -> Message;
}

/// Packet format spoken on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PacketFormat {
    /// Legacy fixed-header format.
    Legacy,
    /// Bit-packed format.
    #[default]
    BitPacked,
}

/// How packets are delimited on the link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// One packet per GATT write/notification.
    #[default]
    Gatt,
    /// Packets wrapped in [`StreamFrame`]s on a byte stream.
    Stream,
}
