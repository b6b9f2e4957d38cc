//! Error types for the gaia library.

use thiserror::Error;

use crate::protocol::PacketFormat;

/// The main error type for gaia operations.
///
/// Cloneable so connection events and plugin callbacks can carry it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Packet or frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The transport rejected or failed to deliver data.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// A connection attempt to a device failed.
    #[error("failed to connect to {device}: {reason}")]
    ConnectFailed { device: String, reason: String },

    /// The operation is not available for the session's packet format.
    #[error("not supported for {0:?} packets")]
    UnsupportedFormat(PacketFormat),

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// Channel send error.
    #[error("channel send error")]
    ChannelSend,

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

/// Packet and frame errors.
///
/// Decoding failures are expected steady-state behaviour on a noisy link:
/// callers drop the offending bytes rather than surfacing them to a user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Buffer too short to contain the fixed header.
    #[error("packet too short: need at least {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },

    /// Stream frame did not start with the start-of-frame marker.
    #[error("bad start of frame marker: 0x{0:02x}")]
    BadStartMarker(u8),

    /// Incomplete frame data.
    #[error("incomplete frame: expected {expected} bytes, got {got}")]
    Incomplete { expected: usize, got: usize },

    /// Payload exceeds the maximum size for the framing mode in use.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// Stream frame checksum did not match its contents.
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{got:02x}")]
    Checksum { expected: u8, got: u8 },
}

/// Result type alias for gaia operations.
pub type Result<T> = std::result::Result<T, Error>;
