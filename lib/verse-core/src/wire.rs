//! Primitive wire codec: integer/real item encoding and the length header that introduces every
//! packed command batch.
//!
//! Header layout (two or three bytes):
//!
//! ```text
//! byte0: [ long:1 bit | length_lo:7 bits ]
//! byte1: [ length_hi:8 bits ]               (present only when `long` is set)
//! last:  [ share:8 bits ]
//! ```
//!
//! `length` is the total byte count of the command batch that follows the opcode byte; one byte
//! is emitted for it when it fits in the 7 low bits of byte0 (`0..=127`), otherwise two bytes are
//! emitted, giving a 15-bit length. `share` — the number of leading address bytes shared across
//! the run — always gets its own trailing byte rather than sharing bits with `length`: a run can
//! share as many bytes as the widest descriptor's `key_size` allows (up to `command::
//! MAX_ADDRESS_LEN`), which does not fit in the 2-3 bits a packed encoding could spare without
//! also shrinking `length`'s range, so `unpack_run` would silently reconstruct the wrong number of
//! commands from the wrong shared prefix for any run sharing more than a couple of bytes.
use crate::error::{CoreError, MalformedReason};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor};

const LONG_BIT: u8 = 0b1000_0000;
const LENGTH_LO_MASK: u8 = 0b0111_1111;
pub const MAX_SHORT_LENGTH: u16 = LENGTH_LO_MASK as u16;
pub const MAX_LENGTH: u16 = (LENGTH_LO_MASK as u16) | (0xFFu16 << 7);

/// Writes the length header, returning the number of bytes emitted (2 or 3: the length field plus
/// the trailing share byte).
pub fn write_header(out: &mut Vec<u8>, length: u16, share: u8) -> usize {
    debug_assert!(length <= MAX_LENGTH, "command batch length exceeds header capacity");

    if length <= MAX_SHORT_LENGTH {
        out.push(length as u8 & LENGTH_LO_MASK);
        out.push(share);
        2
    } else {
        let length_lo = (length as u8) & LENGTH_LO_MASK;
        let length_hi = (length >> 7) as u8;
        out.push(LONG_BIT | length_lo);
        out.push(length_hi);
        out.push(share);
        3
    }
}

/// Number of bytes `write_header` would emit for `length`, without actually writing anything.
/// Used by the outbound queue's run tracker to cost out a prospective run (§4.3) before any of
/// its commands are popped.
#[inline]
pub fn header_size(length: u16) -> usize {
    if length <= MAX_SHORT_LENGTH {
        2
    } else {
        3
    }
}

/// Reads a length header from the front of `data`, returning `(length, share, header_size)`.
pub fn read_header(data: &[u8]) -> Result<(u16, u8, usize), CoreError> {
    let byte0 = *data
        .first()
        .ok_or(CoreError::Malformed(MalformedReason::BadLengthHeader))?;

    let length_lo = byte0 & LENGTH_LO_MASK;

    if byte0 & LONG_BIT == 0 {
        let share = *data
            .get(1)
            .ok_or(CoreError::Malformed(MalformedReason::BadLengthHeader))?;
        Ok((length_lo as u16, share, 2))
    } else {
        let byte1 = *data
            .get(1)
            .ok_or(CoreError::Malformed(MalformedReason::BadLengthHeader))?;
        let length = (length_lo as u16) | ((byte1 as u16) << 7);
        let share = *data
            .get(2)
            .ok_or(CoreError::Malformed(MalformedReason::BadLengthHeader))?;
        Ok((length, share, 3))
    }
}

/// Wire value-type identifiers (§6).
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum ValueKind {
    U8 = 1,
    U16 = 2,
    U32 = 3,
    U64 = 4,
    R16 = 5,
    R32 = 6,
    R64 = 7,
    String8 = 8,
}

impl ValueKind {
    /// Fixed on-wire byte size for numeric kinds; `None` for the variable-length `String8`.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            ValueKind::U8 => Some(1),
            ValueKind::U16 => Some(2),
            ValueKind::U32 => Some(4),
            ValueKind::U64 => Some(8),
            ValueKind::R16 => Some(2),
            ValueKind::R32 => Some(4),
            ValueKind::R64 => Some(8),
            ValueKind::String8 => None,
        }
    }
}

/// Packs an IEEE 754 binary16 value big-endian (§4.1 ADDED, resolves the REAL16 open question).
#[inline]
pub fn write_r16(buf: &mut Vec<u8>, value: half::f16) {
    buf.write_u16::<BigEndian>(value.to_bits()).unwrap();
}

#[inline]
pub fn read_r16(cursor: &mut Cursor<&[u8]>) -> io::Result<half::f16> {
    Ok(half::f16::from_bits(cursor.read_u16::<BigEndian>()?))
}

#[inline]
pub fn write_string8(buf: &mut Vec<u8>, value: &[u8]) {
    debug_assert!(value.len() <= 255, "string8 exceeds 255 bytes");
    buf.push(value.len() as u8);
    buf.extend_from_slice(value);
}

pub fn read_string8(cursor: &mut Cursor<&[u8]>) -> io::Result<Vec<u8>> {
    let len = cursor.read_u8()? as usize;
    let pos = cursor.position() as usize;
    let data = cursor.get_ref();
    if pos + len > data.len() {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    let out = data[pos..pos + len].to_vec();
    cursor.set_position((pos + len) as u64);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_header_roundtrip() {
        let mut buf = Vec::new();
        let written = write_header(&mut buf, 17, 2);
        assert_eq!(written, 2);
        let (length, share, size) = read_header(&buf).unwrap();
        assert_eq!(length, 17);
        assert_eq!(share, 2);
        assert_eq!(size, 2);
    }

    #[test]
    fn test_long_header_roundtrip() {
        let mut buf = Vec::new();
        let written = write_header(&mut buf, 500, 3);
        assert_eq!(written, 3);
        let (length, share, size) = read_header(&buf).unwrap();
        assert_eq!(length, 500);
        assert_eq!(share, 3);
        assert_eq!(size, 3);
    }

    #[test]
    fn test_share_beyond_a_couple_bytes_round_trips_exactly() {
        // A run sharing all 10 bytes of the widest descriptor key (`layer_set`'s (node_id,
        // layer_id, item_id)) must come back as exactly 10, not truncated to fit a packed
        // bit field (this used to silently clamp to 3 and corrupt `unpack_run`'s reframing).
        let mut buf = Vec::new();
        write_header(&mut buf, 4, 10);
        let (_, share, _) = read_header(&buf).unwrap();
        assert_eq!(share, 10);
    }

    #[test]
    fn test_short_form_boundary() {
        let mut buf = Vec::new();
        assert_eq!(write_header(&mut buf, MAX_SHORT_LENGTH, 0), 2);
        buf.clear();
        assert_eq!(write_header(&mut buf, MAX_SHORT_LENGTH + 1, 0), 3);
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let err = read_header(&[]).unwrap_err();
        assert_eq!(err, CoreError::Malformed(MalformedReason::BadLengthHeader));

        // Short form signalled but the trailing share byte is missing.
        let err = read_header(&[5]).unwrap_err();
        assert_eq!(err, CoreError::Malformed(MalformedReason::BadLengthHeader));

        // Long form signalled but the length_hi byte is missing.
        let err = read_header(&[LONG_BIT]).unwrap_err();
        assert_eq!(err, CoreError::Malformed(MalformedReason::BadLengthHeader));

        // Long form signalled, length_hi present, but the trailing share byte is missing.
        let err = read_header(&[LONG_BIT, 0]).unwrap_err();
        assert_eq!(err, CoreError::Malformed(MalformedReason::BadLengthHeader));
    }

    #[test]
    fn test_r16_roundtrip() {
        let mut buf = Vec::new();
        write_r16(&mut buf, half::f16::from_f32(3.5));
        let mut cursor = Cursor::new(&buf[..]);
        let value = read_r16(&mut cursor).unwrap();
        assert_eq!(value.to_f32(), 3.5);
    }

    #[test]
    fn test_string8_roundtrip() {
        let mut buf = Vec::new();
        write_string8(&mut buf, b"hello");
        let mut cursor = Cursor::new(&buf[..]);
        let value = read_string8(&mut cursor).unwrap();
        assert_eq!(value, b"hello");
    }
}
