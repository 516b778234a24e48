//! RFC 9000 variable-length integer encoding.
//!
//! The top two bits of the first byte select the encoded length (1, 2, 4 or
//! 8 bytes); the remaining bits carry the value.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Largest value a variable-length integer can carry (2^62 - 1).
pub const MAX_VARINT: u64 = (1 << 62) - 1;

/// Decode one variable-length integer from the front of `buf`.
///
/// Peeks the first byte to pick the length class, then consumes exactly that
/// class. Fails with `TruncatedInput` when fewer bytes remain than the class
/// requires, leaving `buf` untouched in that case.
pub fn decode(buf: &mut impl Buf) -> Result<u64, ProtocolError> {
    if !buf.has_remaining() {
        return Err(ProtocolError::TruncatedInput {
            needed: 1,
            remaining: 0,
        });
    }
    let first = buf.chunk()[0];
    match first >> 6 {
        0 => Ok(u64::from(buf.get_u8()) & 0x3f),
        1 => {
            check(buf, 2)?;
            Ok(u64::from(buf.get_u16()) & 0x3fff)
        }
        2 => {
            check(buf, 4)?;
            Ok(u64::from(buf.get_u32()) & 0x3fff_ffff)
        }
        _ => {
            check(buf, 8)?;
            Ok(buf.get_u64() & 0x3fff_ffff_ffff_ffff)
        }
    }
}

/// Encode `value` into `buf` using the smallest length class that fits.
pub fn encode(value: u64, buf: &mut impl BufMut) -> Result<(), ProtocolError> {
    if value <= 0x3f {
        buf.put_u8(value as u8);
    } else if value <= 0x3fff {
        buf.put_u16(value as u16 | 0x4000);
    } else if value <= 0x3fff_ffff {
        buf.put_u32(value as u32 | 0x8000_0000);
    } else if value <= MAX_VARINT {
        buf.put_u64(value | 0xc000_0000_0000_0000);
    } else {
        return Err(ProtocolError::ProtocolViolation(format!(
            "value {value} exceeds variable-length integer range"
        )));
    }
    Ok(())
}

/// Number of bytes `encode` will emit for `value`.
pub fn encoded_len(value: u64) -> usize {
    if value <= 0x3f {
        1
    } else if value <= 0x3fff {
        2
    } else if value <= 0x3fff_ffff {
        4
    } else {
        8
    }
}

fn check(buf: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::TruncatedInput {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}
