//! Bit-packed GATT packet format.
//!
//! The current format squeezes a 2-bit reason code across the feature and
//! command bytes:
//! ```text
//! ┌──────────────┬──────────────────────┬──────────────────────┬─────────┐
//! │ vendor (BE)  │ feature:7 | reason.1 │ reason.0 | command:7 │ payload │
//! │   2 bytes    │        1 byte        │        1 byte        │ n bytes │
//! └──────────────┴──────────────────────┴──────────────────────┴─────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::Packet;
use crate::protocol::byte_order::{Endian, decode16};
use crate::protocol::feature::FeatureId;
use crate::protocol::message::Message;

/// Vendor id whose feature bytes map through [`FeatureId`].
pub const REFERENCE_VENDOR_ID: u16 = 0x001D;

/// Header size of a bit-packed packet.
pub const PACKET_HEADER_SIZE: usize = 4;

/// Why a packet was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reason {
    /// Command to the device.
    Command = 0b00,
    /// Unsolicited notification.
    Notification = 0b01,
    /// Successful response.
    Response = 0b10,
    /// Error response.
    Error = 0b11,
}

impl Reason {
    /// Parses a composed reason value.
    ///
    /// Anything outside the four defined codes reads as [`Reason::Error`].
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits {
            0b00 => Self::Command,
            0b01 => Self::Notification,
            0b10 => Self::Response,
            _ => Self::Error,
        }
    }

    /// Returns the 2-bit wire value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self as u8
    }
}

/// Feature addressed by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureSelector {
    /// Feature of the reference vendor.
    Known(FeatureId),
    /// Reference-vendor feature value with no [`FeatureId`] mapping.
    Unmapped(u8),
    /// Opaque 7-bit feature of another vendor.
    Vendor(u8),
}

impl FeatureSelector {
    /// Decodes a 7-bit feature value in the context of a vendor id.
    #[must_use]
    pub const fn from_bits(vendor_id: u16, bits: u8) -> Self {
        let bits = bits & 0x7F;
        if vendor_id != REFERENCE_VENDOR_ID {
            return Self::Vendor(bits);
        }
        match FeatureId::from_byte(bits) {
            Some(id) => Self::Known(id),
            None => Self::Unmapped(bits),
        }
    }

    /// Returns the 7-bit wire value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Known(id) => id as u8 & 0x7F,
            Self::Unmapped(raw) | Self::Vendor(raw) => raw & 0x7F,
        }
    }

    /// Returns the reference-vendor feature, [`FeatureId::Unknown`] for
    /// unmapped values and `None` for other vendors.
    #[must_use]
    pub const fn feature_id(self) -> Option<FeatureId> {
        match self {
            Self::Known(id) => Some(id),
            Self::Unmapped(_) => Some(FeatureId::Unknown),
            Self::Vendor(_) => None,
        }
    }
}

impl From<FeatureId> for FeatureSelector {
    fn from(id: FeatureId) -> Self {
        Self::Known(id)
    }
}

/// A packet in the bit-packed GATT format.
///
/// The feature selector always agrees with the vendor id, so a packet
/// survives an encode/decode round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaiaPacket {
    vendor_id: u16,
    feature: FeatureSelector,
    reason: Reason,
    command: u8,
    payload: Bytes,
}

impl GaiaPacket {
    /// Creates a new packet.
    ///
    /// The feature is re-read against `vendor_id`: a known feature sent to
    /// another vendor becomes [`FeatureSelector::Vendor`] with the same
    /// bits, and vice versa. The command id is truncated to 7 bits.
    #[must_use]
    pub fn new(
        vendor_id: u16,
        feature: FeatureSelector,
        reason: Reason,
        command: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            vendor_id,
            feature: FeatureSelector::from_bits(vendor_id, feature.bits()),
            reason,
            command: command & 0x7F,
            payload: payload.into(),
        }
    }

    /// Creates a command packet for a reference-vendor feature.
    #[must_use]
    pub fn command(feature: FeatureId, command: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(
            REFERENCE_VENDOR_ID,
            feature.into(),
            Reason::Command,
            command,
            payload,
        )
    }

    /// Vendor identifier.
    #[must_use]
    pub const fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    /// Addressed feature.
    #[must_use]
    pub const fn feature(&self) -> FeatureSelector {
        self.feature
    }

    /// Reason code.
    #[must_use]
    pub const fn reason(&self) -> Reason {
        self.reason
    }

    /// Command identifier (7 bits).
    #[must_use]
    pub const fn command_id(&self) -> u8 {
        self.command
    }

    /// Payload following the header.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl Packet for GaiaPacket {
    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let (Some(vendor_id), Some(&[feature_byte, command_byte])) =
            (decode16(data, 0, Endian::Big), data.get(2..PACKET_HEADER_SIZE))
        else {
            return Err(FrameError::TooShort {
                need: PACKET_HEADER_SIZE,
                got: data.len(),
            });
        };

        let reason = Reason::from_bits(((feature_byte & 0x01) << 1) | (command_byte >> 7));

        Ok(Self {
            vendor_id,
            feature: FeatureSelector::from_bits(vendor_id, feature_byte >> 1),
            reason,
            command: command_byte & 0x7F,
            payload: Bytes::copy_from_slice(&data[PACKET_HEADER_SIZE..]),
        })
    }

    fn encode(&self) -> Bytes {
        let reason = self.reason.bits();
        let feature_byte = (self.feature.bits() << 1) | (reason >> 1);
        let command_byte = ((reason & 0x01) << 7) | (self.command & 0x7F);

        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE + self.payload.len());
        buf.put_u16(self.vendor_id);
        buf.put_u8(feature_byte);
        buf.put_u8(command_byte);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    fn classify(&self) -> Message {
        let command = u16::from(self.command);
        match self.reason {
            Reason::Command => Message::Unknown,
            Reason::Notification => Message::Notification {
                id: self.command,
                data: self.payload.clone(),
            },
            Reason::Response => Message::Response {
                command,
                data: self.payload.clone(),
            },
            Reason::Error => {
                let (code, data) = Message::split_status(&self.payload);
                Message::Error {
                    command,
                    code,
                    data,
                }
            }
        }
    }
}
