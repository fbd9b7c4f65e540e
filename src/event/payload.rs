use crate::field::FieldType;

use super::descriptor::EventTypeDescriptor;
use super::view::{AuxBlob, RawEvent};

/// A number that can be stored into a numeric field cell
pub trait CellValue: Copy {
    fn to_bits_u64(self) -> u64;
    fn to_f64(self) -> f64;
}

macro_rules! impl_cell_value_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl CellValue for $t {
                fn to_bits_u64(self) -> u64 {
                    self as u64
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_cell_value_int!(u8, u16, u32, u64, i8, i16, i32, i64, usize);

impl CellValue for f32 {
    fn to_bits_u64(self) -> u64 {
        self as u64
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl CellValue for f64 {
    fn to_bits_u64(self) -> u64 {
        self as u64
    }

    fn to_f64(self) -> f64 {
        self
    }
}

impl CellValue for bool {
    fn to_bits_u64(self) -> u64 {
        u64::from(self)
    }

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
}

/// Producer-side builder for one event instance
///
/// Writes values into the fixed buffer at each field's declared offset and
/// collects aux payloads. Used by [`crate::trace_file::TraceWriter`] users
/// and by tests to synthesize streams.
///
/// # Example
/// ```
/// use rastro::event::{EventPayload, EventTypeDescriptor};
///
/// let desc = EventTypeDescriptor::builder(2, "Memory", "Free").u64("Address").build();
/// let event = EventPayload::new(&desc).set("Address", 0x1010u64).build();
/// assert_eq!(event.view(&desc).get_value::<u64>("Address"), 0x1010);
/// ```
#[derive(Debug, Clone)]
pub struct EventPayload<'a> {
    descriptor: &'a EventTypeDescriptor,
    event: RawEvent,
}

impl<'a> EventPayload<'a> {
    pub fn new(descriptor: &'a EventTypeDescriptor) -> Self {
        Self {
            descriptor,
            event: RawEvent {
                uid: descriptor.uid,
                fixed: vec![0; descriptor.fixed_size()],
                aux: Vec::new(),
                attachment: Vec::new(),
            },
        }
    }

    /// Store a scalar, converting to the field's storage type
    ///
    /// Unknown or non-scalar field names are ignored.
    pub fn set<V: CellValue>(mut self, name: &str, value: V) -> Self {
        let Some((_, field)) = self.descriptor.field(name) else {
            tracing::debug!(field = name, "payload field not declared; ignoring");
            return self;
        };
        let Some(ty) = field.field_type().filter(|_| !field.is_aux()) else {
            return self;
        };
        let offset = field.offset as usize;
        let bytes: Vec<u8> = match ty {
            FieldType::U8 => vec![value.to_bits_u64() as u8],
            FieldType::U16 => (value.to_bits_u64() as u16).to_le_bytes().to_vec(),
            FieldType::U32 => (value.to_bits_u64() as u32).to_le_bytes().to_vec(),
            FieldType::U64 => value.to_bits_u64().to_le_bytes().to_vec(),
            FieldType::F32 => (value.to_f64() as f32).to_le_bytes().to_vec(),
            FieldType::F64 => value.to_f64().to_le_bytes().to_vec(),
        };
        self.event.fixed[offset..offset + bytes.len()].copy_from_slice(&bytes);
        self
    }

    /// Raw packed payload for an array field
    pub fn array(self, name: &str, data: Vec<u8>) -> Self {
        self.aux(name, data)
    }

    pub fn string(self, name: &str, value: &str) -> Self {
        self.aux(name, value.as_bytes().to_vec())
    }

    pub fn wide_string(self, name: &str, value: &str) -> Self {
        let data = value.encode_utf16().flat_map(u16::to_le_bytes).collect();
        self.aux(name, data)
    }

    pub fn attachment(mut self, data: Vec<u8>) -> Self {
        self.event.attachment = data;
        self
    }

    pub fn build(self) -> RawEvent {
        self.event
    }

    fn aux(mut self, name: &str, data: Vec<u8>) -> Self {
        let Some((index, _)) = self.descriptor.field(name) else {
            tracing::debug!(field = name, "payload field not declared; ignoring");
            return self;
        };
        let Ok(field_index) = u8::try_from(index) else {
            return self;
        };
        self.event.aux.retain(|blob| blob.field_index != field_index);
        self.event.aux.push(AuxBlob { field_index, data });
        self
    }
}
