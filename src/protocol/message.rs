//! Classified messages handed to plugins.

use bytes::Bytes;

/// Semantic shape of a decoded packet.
///
/// Derived deterministically from a packet by [`Packet::classify`].
///
/// [`Packet::classify`]: crate::protocol::Packet::classify
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A command addressed to the device. Never surfaced to plugins.
    Command,
    /// Unsolicited notification from the device.
    Notification { id: u8, data: Bytes },
    /// Successful response to a command.
    Response { command: u16, data: Bytes },
    /// Error response to a command.
    Error { command: u16, code: u8, data: Bytes },
    /// Anything the codec could not give a meaning to.
    Unknown,
}

impl Message {
    /// Returns true if this message answers a previously sent command.
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        matches!(self, Self::Response { .. } | Self::Error { .. })
    }

    /// Splits a payload into a leading status byte and the remainder.
    ///
    /// A missing status byte reads as `0`.
    pub(crate) fn split_status(payload: &Bytes) -> (u8, Bytes) {
        match payload.first() {
            Some(&status) => (status, payload.slice(1..)),
            None => (0, Bytes::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_reply() {
        assert!(
            Message::Response {
                command: 1,
                data: Bytes::new()
            }
            .is_reply()
        );
        assert!(
            Message::Error {
                command: 1,
                code: 2,
                data: Bytes::new()
            }
            .is_reply()
        );
        assert!(!Message::Unknown.is_reply());
        assert!(
            !Message::Notification {
                id: 0,
                data: Bytes::new()
            }
            .is_reply()
        );
    }

    #[test]
    fn test_split_status() {
        let (status, rest) = Message::split_status(&Bytes::from_static(&[0x03, 0xAA]));
        assert_eq!(status, 3);
        assert_eq!(rest, Bytes::from_static(&[0xAA]));

        let (status, rest) = Message::split_status(&Bytes::new());
        assert_eq!(status, 0);
        assert!(rest.is_empty());
    }
}
