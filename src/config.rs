//! Session configuration.

use std::time::Duration;

use crate::connection::ConnectionKind;
use crate::protocol::{Framing, PacketFormat};
use crate::queue::ACK_TIMEOUT;

/// Configuration for a device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Packet format spoken by the device.
    pub format: PacketFormat,
    /// How packets are delimited on the link.
    pub framing: Framing,
    /// How long to wait for a reply before dropping a command.
    pub ack_timeout: Duration,
    /// Whether the device accepts stream frames with a 2-byte length.
    pub length_extension: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(PacketFormat::default())
    }
}

impl SessionConfig {
    /// Creates a GATT configuration for the given packet format.
    #[must_use]
    pub const fn new(format: PacketFormat) -> Self {
        Self {
            format,
            framing: Framing::Gatt,
            ack_timeout: ACK_TIMEOUT,
            length_extension: false,
        }
    }

    /// Creates a configuration with the framing of a connection kind.
    #[must_use]
    pub const fn for_kind(format: PacketFormat, kind: ConnectionKind) -> Self {
        Self::new(format).framing(kind.framing())
    }

    /// Sets the framing.
    #[must_use]
    pub const fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Sets the acknowledgement timeout.
    #[must_use]
    pub const fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Sets length-extension support for stream frames.
    #[must_use]
    pub const fn length_extension(mut self, supported: bool) -> Self {
        self.length_extension = supported;
        self
    }
}
