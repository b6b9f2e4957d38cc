//! 16-bit integer conversion shared by every packet codec.

/// Byte order of a 16-bit field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Reads a 16-bit value at `offset`.
///
/// Returns `None` if `offset + 2` runs past the end of `buffer`.
#[must_use]
pub fn decode16(buffer: &[u8], offset: usize, endian: Endian) -> Option<u16> {
    let end = offset.checked_add(2)?;
    let bytes: [u8; 2] = buffer.get(offset..end)?.try_into().ok()?;
    Some(match endian {
        Endian::Big => u16::from_be_bytes(bytes),
        Endian::Little => u16::from_le_bytes(bytes),
    })
}

/// Encodes a 16-bit value as two bytes.
#[must_use]
pub const fn encode16(value: u16, endian: Endian) -> [u8; 2] {
    match endian {
        Endian::Big => value.to_be_bytes(),
        Endian::Little => value.to_le_bytes(),
    }
}
