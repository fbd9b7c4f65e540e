//! 7-bit variable-length integers and zig-zag signed encoding
//!
//! Dense stat-update batches pack every id, cycle delta and integer operand
//! as little-endian groups of 7 bits. The high bit of each byte flags that
//! another group follows. Signed operands are zig-zag mapped first so that
//! small negative deltas stay small on the wire.
//!
//! ```text
//!   300  = 0b1_0010_1100
//!   wire = [0xAC, 0x02]     (0x2C | 0x80, 0x02)
//! ```
//!
//! Decoding goes through [`ByteCursor`], which bounds-checks every read
//! against the buffer it was created over. Running off the end is reported
//! as [`DecodeError::Overrun`] so callers can abort a corrupt batch without
//! touching memory outside it.

use thiserror::Error;

/// Maximum encoded width of a u64 (ceil(64 / 7))
pub const MAX_VARINT_LEN: usize = 10;

/// Errors raised while decoding a compact byte stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("read of {wanted} byte(s) at offset {offset} overruns buffer of {len} byte(s)")]
    Overrun {
        offset: usize,
        wanted: usize,
        len: usize,
    },

    #[error("varint at offset {offset} does not fit in 64 bits")]
    Overlong { offset: usize },

    #[error("unknown stat opcode {opcode} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("declared batch length {declared} does not match payload length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Forward-only reader over a borrowed byte buffer
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.buf.get(self.pos).ok_or(DecodeError::Overrun {
            offset: self.pos,
            wanted: 1,
            len: self.buf.len(),
        })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::Overrun {
                offset: self.pos,
                wanted: count,
                len: self.buf.len(),
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Raw little-endian IEEE double, as used by float stat operands
    pub fn read_f64_le(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    /// Decode one unsigned 7-bit varint
    ///
    /// # Example
    /// ```
    /// use rastro::varint::ByteCursor;
    ///
    /// let mut cursor = ByteCursor::new(&[0xac, 0x02, 0x05]);
    /// assert_eq!(cursor.decode_varint7().unwrap(), 300);
    /// assert_eq!(cursor.position(), 2);
    /// ```
    pub fn decode_varint7(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            if shift >= 64 {
                return Err(DecodeError::Overlong { offset: start });
            }
            let byte = self.read_u8()?;
            // the tenth group carries only bit 63
            if shift == 63 && byte > 1 {
                return Err(DecodeError::Overlong { offset: start });
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Decode one zig-zag encoded signed varint
    pub fn decode_zigzag(&mut self) -> Result<i64, DecodeError> {
        self.decode_varint7().map(zigzag_decode)
    }
}

/// Map a signed value onto the unsigned zig-zag line (0, -1, 1, -2, ...)
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append `value` as a 7-bit varint
pub fn encode_varint7(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Append `value` zig-zag mapped as a 7-bit varint
pub fn encode_zigzag(value: i64, out: &mut Vec<u8>) {
    encode_varint7(zigzag_encode(value), out);
}

/// Encoded width of `value` in bytes
pub fn varint7_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}
