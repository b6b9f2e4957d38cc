//! Per-feature plugins.
//!
//! A plugin handles the messages of one feature and sends commands through
//! an [`OutboundChannel`]. Plugins are created by the
//! [`PluginRegistry`](registry::PluginRegistry) when a session starts and are
//! owned by that session until it stops.

pub mod registry;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::connection::ConnectionKind;
use crate::error::{Error, Result};
use crate::protocol::message::Message;
use crate::protocol::{FeatureId, Framing, GaiaPacket, Packet, PacketFormat, StreamFrame};
use crate::queue::QueuedCommand;

pub use registry::{PluginConstructor, PluginRegistry};

/// Lifecycle of a feature handler.
pub trait Plugin: Send {
    /// Feature this plugin handles.
    fn feature(&self) -> FeatureId;

    /// Called once the session is running.
    fn start(&mut self);

    /// Called before the session drops the plugin.
    fn stop(&mut self);

    /// Called when the device hands over to another endpoint.
    fn on_handover(&mut self) {}

    /// Called for every notification, response or error addressed to
    /// this plugin's feature.
    fn on_message(&mut self, message: &Message);

    /// Called after each write to the transport.
    fn on_send_result(&mut self, _kind: ConnectionKind, _error: Option<&Error>) {}
}

/// Sending half handed to plugins.
///
/// Packets are encoded (and framed for stream links) here, then queued for
/// the session to write. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct OutboundChannel {
    tx: mpsc::UnboundedSender<QueuedCommand>,
    format: PacketFormat,
    framing: Framing,
    length_extension: bool,
}

impl OutboundChannel {
    /// Creates a channel and the receiver the session drains.
    #[must_use]
    pub fn new(config: &SessionConfig) -> (Self, mpsc::UnboundedReceiver<QueuedCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            tx,
            format: config.format,
            framing: config.framing,
            length_extension: config.length_extension,
        };
        (channel, rx)
    }

    /// Queues already-encoded bytes.
    pub fn send_raw(&self, payload: Bytes, ack_expected: bool) -> Result<()> {
        self.tx
            .send(QueuedCommand::new(payload, ack_expected))
            .map_err(|_| Error::ChannelClosed)
    }

    /// Encodes and queues a packet of any format.
    pub fn send<P: Packet>(&self, packet: &P, ack_expected: bool) -> Result<()> {
        let encoded = packet.encode();
        let bytes = match self.framing {
            Framing::Gatt => encoded,
            Framing::Stream => StreamFrame::new(encoded, self.length_extension)?.encode(),
        };
        self.send_raw(bytes, ack_expected)
    }

    /// Queues a command for a reference-vendor feature and expects a reply.
    ///
    /// Features only exist in the bit-packed format; a legacy session
    /// returns [`Error::UnsupportedFormat`] and its plugins send
    /// [`LegacyPacket`](crate::protocol::LegacyPacket)s through
    /// [`send`](Self::send) instead.
    pub fn send_command(
        &self,
        feature: FeatureId,
        command: u8,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        if self.format != PacketFormat::BitPacked {
            return Err(Error::UnsupportedFormat(self.format));
        }
        self.send(&GaiaPacket::command(feature, command, payload), true)
    }

    /// Packet format of the session this channel feeds.
    #[must_use]
    pub const fn format(&self) -> PacketFormat {
        self.format
    }

    /// Returns true once the session has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LegacyPacket;

    #[test]
    fn test_send_command_gatt() {
        let (channel, mut rx) = OutboundChannel::new(&SessionConfig::default());
        channel
            .send_command(FeatureId::Battery, 0x01, vec![0x02])
            .unwrap();

        let queued = rx.try_recv().unwrap();
        assert!(queued.ack_expected);
        assert_eq!(&queued.payload[..], &[0x00, 0x1D, 0x1A, 0x01, 0x02]);
    }

    #[test]
    fn test_send_framed() {
        let config = SessionConfig::for_kind(PacketFormat::Legacy, ConnectionKind::AccessoryStream);
        let (channel, mut rx) = OutboundChannel::new(&config);
        channel
            .send(&LegacyPacket::new(0x000A, 0x0301, false, Bytes::new()), false)
            .unwrap();

        let queued = rx.try_recv().unwrap();
        assert!(!queued.ack_expected);
        assert_eq!(
            &queued.payload[..],
            &[0xFF, 0x01, 0x00, 0x00, 0x00, 0x0A, 0x03, 0x01]
        );
    }

    #[test]
    fn test_send_command_rejected_for_legacy() {
        let config = SessionConfig::for_kind(PacketFormat::Legacy, ConnectionKind::Ble);
        let (channel, mut rx) = OutboundChannel::new(&config);
        assert_eq!(channel.format(), PacketFormat::Legacy);

        assert_eq!(
            channel.send_command(FeatureId::Battery, 0x01, Bytes::new()),
            Err(Error::UnsupportedFormat(PacketFormat::Legacy))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_oversized_frame_fails() {
        let config = SessionConfig::new(PacketFormat::Legacy).framing(Framing::Stream);
        let (channel, _rx) = OutboundChannel::new(&config);
        let packet = LegacyPacket::new(0x000A, 0x0301, false, vec![0u8; 300]);

        assert!(matches!(
            channel.send(&packet, true),
            Err(Error::Frame(crate::error::FrameError::TooLarge { .. }))
        ));
    }

    #[test]
    fn test_send_after_close() {
        let (channel, rx) = OutboundChannel::new(&SessionConfig::default());
        drop(rx);
        assert!(channel.is_closed());
        assert!(matches!(
            channel.send_raw(Bytes::from_static(&[1]), false),
            Err(Error::ChannelClosed)
        ));
    }
}
