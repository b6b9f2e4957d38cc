//! Stream framing for byte-stream transports.
//!
//! Packets carried over an accessory stream are wrapped in a frame:
//! ```text
//! ┌──────┬─────────┬───────┬──────────────┬─────────────────┬────────────┐
//! │ 0xFF │ version │ flags │ length (BE)  │     payload     │ checksum?  │
//! │  1   │    1    │   1   │    1 or 2    │   length + 4    │     1      │
//! └──────┴─────────┴───────┴──────────────┴─────────────────┴────────────┘
//! ```
//!
//! The length field excludes the 4-byte packet header at the start of the
//! payload. Flag bit 0 marks a trailing XOR checksum, bit 4 a 2-byte length.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::Packet;
use crate::protocol::byte_order::{Endian, decode16};
use crate::protocol::message::Message;
use crate::protocol::packet::GaiaPacket;

/// Start of frame marker.
pub const START_OF_FRAME: u8 = 0xFF;

/// Protocol version written by [`StreamFrame::new`].
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Flag: a checksum byte follows the payload.
pub const FLAG_CHECKSUM: u8 = 0x01;

/// Flag: the length field is 2 bytes wide.
pub const FLAG_LENGTH_EXTENSION: u8 = 0x10;

/// Minimum frame size (marker, version, flags, 1-byte length).
pub const MIN_FRAME_SIZE: usize = 4;

/// Packet header carried at the start of every payload.
pub const INNER_HEADER_SIZE: usize = 4;

/// Largest payload that fits without the length extension.
pub const MAX_PAYLOAD_NO_EXTENSION: usize = 253;

/// Largest payload that fits with the length extension.
pub const MAX_PAYLOAD_EXTENSION: usize = 65533;

/// A framed packet read from or written to a byte stream.
///
/// The checksum byte is present exactly when the flags carry
/// [`FLAG_CHECKSUM`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    version: u8,
    flags: u8,
    payload: Bytes,
    checksum: Option<u8>,
}

impl StreamFrame {
    /// Wraps a payload in a frame.
    ///
    /// Payloads longer than [`MAX_PAYLOAD_NO_EXTENSION`] need the length
    /// extension. No checksum is added.
    pub fn new(payload: impl Into<Bytes>, extension_supported: bool) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() < INNER_HEADER_SIZE {
            return Err(FrameError::TooShort {
                need: INNER_HEADER_SIZE,
                got: payload.len(),
            });
        }

        let max = if extension_supported {
            MAX_PAYLOAD_EXTENSION
        } else {
            MAX_PAYLOAD_NO_EXTENSION
        };
        if payload.len() > max {
            return Err(FrameError::TooLarge {
                size: payload.len(),
                max,
            });
        }

        let flags = if payload.len() > MAX_PAYLOAD_NO_EXTENSION {
            FLAG_LENGTH_EXTENSION
        } else {
            0
        };

        Ok(Self {
            version: PROTOCOL_VERSION,
            flags,
            payload,
            checksum: None,
        })
    }

    /// Sets the checksum flag and appends the XOR checksum.
    #[must_use]
    pub fn with_checksum(mut self) -> Self {
        self.flags |= FLAG_CHECKSUM;
        self.checksum = Some(self.computed_checksum());
        self
    }

    /// Protocol version byte.
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// Raw flags byte.
    #[must_use]
    pub const fn flags(&self) -> u8 {
        self.flags
    }

    /// Payload, including the inner 4-byte packet header.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Trailing checksum byte, if the frame carries one.
    #[must_use]
    pub const fn checksum(&self) -> Option<u8> {
        self.checksum
    }

    /// Returns true if the 2-byte length field is in use.
    #[must_use]
    pub const fn has_length_extension(&self) -> bool {
        self.flags & FLAG_LENGTH_EXTENSION != 0
    }

    /// Returns true if the frame carries a checksum byte.
    #[must_use]
    pub const fn has_checksum(&self) -> bool {
        self.flags & FLAG_CHECKSUM != 0
    }

    /// Size of the encoded frame in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        header_size(self.flags) + self.payload.len()
    }

    /// XOR of every byte preceding the checksum.
    #[must_use]
    pub fn computed_checksum(&self) -> u8 {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.put_body(&mut buf);
        buf.iter().fold(0, |acc, b| acc ^ b)
    }

    /// Returns false if a checksum is present and does not match.
    #[must_use]
    pub fn checksum_valid(&self) -> bool {
        self.checksum
            .is_none_or(|checksum| checksum == self.computed_checksum())
    }

    /// Decodes the payload as a packet of the given format.
    pub fn inner<P: Packet>(&self) -> Result<P, FrameError> {
        P::decode(&self.payload)
    }

    fn put_body(&self, buf: &mut BytesMut) {
        // declared length excludes the inner header
        let declared = self.payload.len().saturating_sub(INNER_HEADER_SIZE);
        buf.put_u8(START_OF_FRAME);
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        if self.has_length_extension() {
            buf.put_u16(u16::try_from(declared).unwrap_or(u16::MAX));
        } else {
            buf.put_u8(u8::try_from(declared).unwrap_or(u8::MAX));
        }
        buf.put_slice(&self.payload);
    }
}

/// Header bytes (everything except the payload) implied by a flags byte.
const fn header_size(flags: u8) -> usize {
    let mut size = MIN_FRAME_SIZE;
    if flags & FLAG_LENGTH_EXTENSION != 0 {
        size += 1;
    }
    if flags & FLAG_CHECKSUM != 0 {
        size += 1;
    }
    size
}

impl Packet for StreamFrame {
    fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < MIN_FRAME_SIZE {
            return Err(FrameError::TooShort {
                need: MIN_FRAME_SIZE,
                got: data.len(),
            });
        }
        if data[0] != START_OF_FRAME {
            return Err(FrameError::BadStartMarker(data[0]));
        }

        let version = data[1];
        let flags = data[2];

        let (declared, length_size) = if flags & FLAG_LENGTH_EXTENSION != 0 {
            let length = decode16(data, 3, Endian::Big).ok_or(FrameError::TooShort {
                need: MIN_FRAME_SIZE + 1,
                got: data.len(),
            })?;
            (usize::from(length), 2)
        } else {
            (usize::from(data[3]), 1)
        };

        let total = header_size(flags) + declared + INNER_HEADER_SIZE;
        if data.len() < total {
            return Err(FrameError::Incomplete {
                expected: total,
                got: data.len(),
            });
        }

        let start = 3 + length_size;
        let end = start + declared + INNER_HEADER_SIZE;
        let checksum = (flags & FLAG_CHECKSUM != 0).then(|| data[total - 1]);

        Ok(Self {
            version,
            flags,
            payload: Bytes::copy_from_slice(&data[start..end]),
            checksum,
        })
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.put_body(&mut buf);
        if self.has_checksum() {
            let checksum = self
                .checksum
                .unwrap_or_else(|| buf.iter().fold(0, |acc, b| acc ^ b));
            buf.put_u8(checksum);
        }
        buf.freeze()
    }

    /// Classifies the payload as a bit-packed packet.
    ///
    /// Use [`StreamFrame::inner`] to read a legacy payload instead.
    fn classify(&self) -> Message {
        self.inner::<GaiaPacket>()
            .as_ref()
            .map_or(Message::Unknown, Packet::classify)
    }
}

/// Outcome of inspecting the bytes after a start marker.
enum Header {
    /// Not enough bytes to judge yet.
    NeedMore,
    /// The marker cannot start a frame.
    Noise,
    /// Looks like a frame header.
    Plausible,
}

/// Flag bits with a defined meaning.
const KNOWN_FLAGS: u8 = FLAG_CHECKSUM | FLAG_LENGTH_EXTENSION;

/// Frame decoder that handles partial data from a byte stream.
///
/// Leading bytes that cannot start a frame are discarded, so the decoder
/// resynchronises on the next start marker after line noise. A marker
/// followed by an unknown version, reserved flag bits, a length extension
/// the link does not support, or an oversized length counts as noise.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    length_extension: bool,
}

impl FrameDecoder {
    /// Creates a decoder for a link without the length extension.
    #[must_use]
    pub fn new() -> Self {
        Self::with_length_extension(false)
    }

    /// Creates a decoder, accepting 2-byte lengths if `supported`.
    #[must_use]
    pub fn with_length_extension(supported: bool) -> Self {
        Self {
            buffer: BytesMut::new(),
            length_extension: supported,
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or an error if a complete frame
    /// failed its checksum. A failed frame is consumed; call again to
    /// continue with the following bytes.
    pub fn decode(&mut self) -> Result<Option<StreamFrame>, FrameError> {
        loop {
            let Some(skip) = self.buffer.iter().position(|&b| b == START_OF_FRAME) else {
                if !self.buffer.is_empty() {
                    tracing::trace!("discarding {} bytes without start marker", self.buffer.len());
                }
                self.buffer.clear();
                return Ok(None);
            };
            if skip > 0 {
                tracing::trace!("skipping {} bytes before start marker", skip);
                self.buffer.advance(skip);
            }

            match self.check_header() {
                Header::NeedMore => return Ok(None),
                Header::Noise => {
                    tracing::trace!("start marker followed by an invalid header");
                    self.buffer.advance(1);
                }
                Header::Plausible => break,
            }
        }

        let frame = match StreamFrame::decode(&self.buffer) {
            Ok(frame) => frame,
            Err(FrameError::TooShort { .. } | FrameError::Incomplete { .. }) => return Ok(None),
            Err(e) => {
                self.buffer.advance(1);
                return Err(e);
            }
        };

        self.buffer.advance(frame.encoded_len());

        if let Some(got) = frame.checksum {
            let expected = frame.computed_checksum();
            if got != expected {
                return Err(FrameError::Checksum { expected, got });
            }
        }

        Ok(Some(frame))
    }

    fn check_header(&self) -> Header {
        let (Some(&version), Some(&flags)) = (self.buffer.get(1), self.buffer.get(2)) else {
            return Header::NeedMore;
        };
        if version != PROTOCOL_VERSION || flags & !KNOWN_FLAGS != 0 {
            return Header::Noise;
        }

        let extended = flags & FLAG_LENGTH_EXTENSION != 0;
        if extended && !self.length_extension {
            return Header::Noise;
        }

        let (declared, max) = if extended {
            let Some(length) = decode16(&self.buffer, 3, Endian::Big) else {
                return Header::NeedMore;
            };
            (usize::from(length), MAX_PAYLOAD_EXTENSION)
        } else {
            let Some(&length) = self.buffer.get(3) else {
                return Header::NeedMore;
            };
            (usize::from(length), MAX_PAYLOAD_NO_EXTENSION)
        };

        if declared + INNER_HEADER_SIZE > max {
            Header::Noise
        } else {
            Header::Plausible
        }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
