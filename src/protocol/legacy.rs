//! Legacy fixed-header GATT packet format.
//!
//! ```text
//! ┌──────────────┬──────────────────────────┬─────────────┐
//! │ vendor (BE)  │ ack:1 | command:15 (BE)  │   payload   │
//! │   2 bytes    │         2 bytes          │   n bytes   │
//! └──────────────┴──────────────────────────┴─────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::Packet;
use crate::protocol::byte_order::{Endian, decode16};
use crate::protocol::message::Message;

/// Header size of a legacy packet.
pub const LEGACY_HEADER_SIZE: usize = 4;

/// Command id that always carries a notification.
pub const EVENT_NOTIFICATION: u16 = 0x4003;

/// Bit of the command field flagging an acknowledgement.
pub const ACK_MASK: u16 = 0x8000;

/// Bits of the command field holding the command id.
pub const COMMAND_MASK: u16 = 0x7FFF;

/// A packet in the legacy GATT format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPacket {
    vendor_id: u16,
    command: u16,
    ack: bool,
    payload: Bytes,
}

impl LegacyPacket {
    /// Creates a new legacy packet.
    ///
    /// The command id is truncated to 15 bits; the top bit belongs to `ack`.
    #[must_use]
    pub fn new(vendor_id: u16, command: u16, ack: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            vendor_id,
            command: command & COMMAND_MASK,
            ack,
            payload: payload.into(),
        }
    }

    /// Vendor identifier.
    #[must_use]
    pub const fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    /// Command identifier (15 bits).
    #[must_use]
    pub const fn command_id(&self) -> u16 {
        self.command
    }

    /// Acknowledgement flag.
    #[must_use]
    pub const fn is_ack(&self) -> bool {
        self.ack
    }

    /// Payload following the header.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl Packet for LegacyPacket {
    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let too_short = || FrameError::TooShort {
            need: LEGACY_HEADER_SIZE,
            got: data.len(),
        };
        let vendor_id = decode16(data, 0, Endian::Big).ok_or_else(too_short)?;
        let field = decode16(data, 2, Endian::Big).ok_or_else(too_short)?;

        Ok(Self {
            vendor_id,
            command: field & COMMAND_MASK,
            ack: field & ACK_MASK != 0,
            payload: Bytes::copy_from_slice(&data[LEGACY_HEADER_SIZE..]),
        })
    }

    fn encode(&self) -> Bytes {
        let mut field = self.command;
        if self.ack {
            field |= ACK_MASK;
        }

        let mut buf = BytesMut::with_capacity(LEGACY_HEADER_SIZE + self.payload.len());
        buf.put_u16(self.vendor_id);
        buf.put_u16(field);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    fn classify(&self) -> Message {
        if self.command == EVENT_NOTIFICATION {
            let (id, data) = Message::split_status(&self.payload);
            return Message::Notification { id, data };
        }

        match Message::split_status(&self.payload) {
            (0, data) => Message::Response {
                command: self.command,
                data,
            },
            (code, data) => Message::Error {
                command: self.command,
                code,
                data,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_header_fields() {
        let packet = LegacyPacket::decode(&[0x00, 0x0A, 0x83, 0x01, 0x00, 0x55]).unwrap();
        assert_eq!(packet.vendor_id(), 0x000A);
        assert_eq!(packet.command_id(), 0x0301);
        assert!(packet.is_ack());
        assert_eq!(packet.payload(), &Bytes::from_static(&[0x00, 0x55]));
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            LegacyPacket::decode(&[0x00, 0x0A, 0x03]),
            Err(FrameError::TooShort { need: 4, got: 3 })
        );
        assert!(LegacyPacket::decode(&[]).is_err());
    }

    #[test]
    fn test_encode_sets_ack_bit() {
        let packet = LegacyPacket::new(0x000A, 0x0301, true, vec![0x01]);
        assert_eq!(&packet.encode()[..], &[0x00, 0x0A, 0x83, 0x01, 0x01]);

        let packet = LegacyPacket::new(0x000A, 0x0301, false, Bytes::new());
        assert_eq!(&packet.encode()[..], &[0x00, 0x0A, 0x03, 0x01]);
    }

    #[test]
    fn test_round_trip() {
        let packet = LegacyPacket::new(0x001D, 0x4003, false, vec![0x05, 0xAA, 0xBB]);
        assert_eq!(LegacyPacket::decode(&packet.encode()).unwrap(), packet);

        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0x10];
        assert_eq!(&LegacyPacket::decode(&bytes).unwrap().encode()[..], &bytes);
    }

    #[test]
    fn test_ack_bit_never_leaks_into_command() {
        let packet = LegacyPacket::new(0x000A, 0x8001, false, Bytes::new());
        assert_eq!(packet.command_id(), 0x0001);
        assert!(!packet.is_ack());

        let decoded = LegacyPacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_classify_notification() {
        let packet =
            LegacyPacket::new(0x000A, EVENT_NOTIFICATION, false, vec![0x05, 0xAA, 0xBB]);
        assert_eq!(
            packet.classify(),
            Message::Notification {
                id: 5,
                data: Bytes::from_static(&[0xAA, 0xBB])
            }
        );
    }

    #[test]
    fn test_classify_response_and_error() {
        let ok = LegacyPacket::new(0x000A, 0x0301, true, vec![0x00, 0x42]);
        assert_eq!(
            ok.classify(),
            Message::Response {
                command: 0x0301,
                data: Bytes::from_static(&[0x42])
            }
        );

        let failed = LegacyPacket::new(0x000A, 0x0301, true, vec![0x05]);
        assert_eq!(
            failed.classify(),
            Message::Error {
                command: 0x0301,
                code: 5,
                data: Bytes::new()
            }
        );
    }

    #[test]
    fn test_classify_missing_status_is_success() {
        let packet = LegacyPacket::new(0x000A, 0x0120, true, Bytes::new());
        assert_eq!(
            packet.classify(),
            Message::Response {
                command: 0x0120,
                data: Bytes::new()
            }
        );
    }
}
