//! Stat update batch wire format
//!
//! ```text
//!   batch := op*
//!   op    := varint7(id << 3 | opcode) varint7(cycle_delta) operand
//!   operand
//!     Increment, Decrement   : (none)
//!     AddInteger, SetInteger : zigzag varint7
//!     AddFloat, SetFloat     : f64, little-endian
//! ```
//!
//! Cycle deltas are relative to the previous op of the same thread, carried
//! across batches by the caller.

use crate::varint::{encode_varint7, encode_zigzag, ByteCursor, DecodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatOpcode {
    Increment = 0,
    Decrement = 1,
    AddInteger = 2,
    SetInteger = 3,
    AddFloat = 4,
    SetFloat = 5,
}

impl StatOpcode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Increment),
            1 => Some(Self::Decrement),
            2 => Some(Self::AddInteger),
            3 => Some(Self::SetInteger),
            4 => Some(Self::AddFloat),
            5 => Some(Self::SetFloat),
            _ => None,
        }
    }
}

/// One decoded stat mutation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatUpdate {
    Increment,
    Decrement,
    AddInteger(i64),
    SetInteger(i64),
    AddFloat(f64),
    SetFloat(f64),
}

impl StatUpdate {
    pub fn opcode(self) -> StatOpcode {
        match self {
            Self::Increment => StatOpcode::Increment,
            Self::Decrement => StatOpcode::Decrement,
            Self::AddInteger(_) => StatOpcode::AddInteger,
            Self::SetInteger(_) => StatOpcode::SetInteger,
            Self::AddFloat(_) => StatOpcode::AddFloat,
            Self::SetFloat(_) => StatOpcode::SetFloat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatOp {
    pub id: u32,
    /// Absolute cycle, already resolved from the delta chain
    pub cycle: u64,
    pub update: StatUpdate,
}

/// Decode a whole batch
///
/// Either every op decodes or none is returned, so a corrupt batch never
/// leaves a half-applied update behind. `last_cycle` is the thread's cursor
/// before this batch; the resolved cycle of the final op becomes the next
/// cursor.
///
/// # Example
/// ```
/// use rastro::stats::{decode_stats_batch, StatUpdate};
///
/// // id 1, SetInteger, delta 10, value -3
/// let ops = decode_stats_batch(&[0x0b, 0x0a, 0x05], 100).unwrap();
/// assert_eq!(ops[0].id, 1);
/// assert_eq!(ops[0].cycle, 110);
/// assert_eq!(ops[0].update, StatUpdate::SetInteger(-3));
/// ```
pub fn decode_stats_batch(data: &[u8], last_cycle: u64) -> Result<Vec<StatOp>, DecodeError> {
    let mut cursor = ByteCursor::new(data);
    let mut cycle = last_cycle;
    let mut ops = Vec::new();

    while !cursor.is_exhausted() {
        let offset = cursor.position();
        let header = cursor.decode_varint7()?;
        let bits = (header & 0x7) as u8;
        let opcode =
            StatOpcode::from_bits(bits).ok_or(DecodeError::UnknownOpcode { opcode: bits, offset })?;
        let id = (header >> 3) as u32;
        cycle = cycle.wrapping_add(cursor.decode_varint7()?);

        let update = match opcode {
            StatOpcode::Increment => StatUpdate::Increment,
            StatOpcode::Decrement => StatUpdate::Decrement,
            StatOpcode::AddInteger => StatUpdate::AddInteger(cursor.decode_zigzag()?),
            StatOpcode::SetInteger => StatUpdate::SetInteger(cursor.decode_zigzag()?),
            StatOpcode::AddFloat => StatUpdate::AddFloat(cursor.read_f64_le()?),
            StatOpcode::SetFloat => StatUpdate::SetFloat(cursor.read_f64_le()?),
        };
        ops.push(StatOp { id, cycle, update });
    }
    Ok(ops)
}

/// Builds batches for producers, tests and benches
#[derive(Debug, Clone, Default)]
pub struct StatsBatchEncoder {
    buf: Vec<u8>,
    last_cycle: u64,
}

impl StatsBatchEncoder {
    /// Start a batch whose first delta is relative to `last_cycle`
    pub fn new(last_cycle: u64) -> Self {
        Self {
            buf: Vec::new(),
            last_cycle,
        }
    }

    /// Append one op; cycles must not go backwards
    pub fn push(&mut self, op: StatOp) -> &mut Self {
        let header = (u64::from(op.id) << 3) | op.update.opcode() as u64;
        encode_varint7(header, &mut self.buf);
        encode_varint7(op.cycle.wrapping_sub(self.last_cycle), &mut self.buf);
        self.last_cycle = op.cycle;

        match op.update {
            StatUpdate::Increment | StatUpdate::Decrement => {}
            StatUpdate::AddInteger(v) | StatUpdate::SetInteger(v) => encode_zigzag(v, &mut self.buf),
            StatUpdate::AddFloat(v) | StatUpdate::SetFloat(v) => {
                self.buf.extend_from_slice(&v.to_le_bytes())
            }
        }
        self
    }

    pub fn last_cycle(&self) -> u64 {
        self.last_cycle
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
