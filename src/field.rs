//! Lazy field coercion for decoded event buffers
//!
//! Event fields are stored as untyped little-endian bytes tagged with a
//! compact `sizeAndType` code: negative codes are IEEE floats of that byte
//! width (-4 = f32, -8 = f64), positive codes are unsigned integers of that
//! byte width (1, 2, 4, 8). Analyzers ask for whatever numeric type they
//! want and the raw cell is converted on read.
//!
//! A missing field is not an error. Trace formats evolve between producer
//! versions, so an absent field (or a cell too short for its declared type)
//! always coerces to the zero value of the requested type.

/// Storage type of a raw field cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl FieldType {
    /// Decode a signed `sizeAndType` code
    ///
    /// # Example
    /// ```
    /// use rastro::field::FieldType;
    ///
    /// assert_eq!(FieldType::from_size_and_type(-8), Some(FieldType::F64));
    /// assert_eq!(FieldType::from_size_and_type(2), Some(FieldType::U16));
    /// assert_eq!(FieldType::from_size_and_type(3), None);
    /// ```
    pub fn from_size_and_type(code: i8) -> Option<Self> {
        match code {
            1 => Some(Self::U8),
            2 => Some(Self::U16),
            4 => Some(Self::U32),
            8 => Some(Self::U64),
            -4 => Some(Self::F32),
            -8 => Some(Self::F64),
            _ => None,
        }
    }

    /// Encode back into the signed `sizeAndType` code
    pub fn size_and_type(self) -> i8 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
            Self::F32 => -4,
            Self::F64 => -8,
        }
    }

    /// Width of one cell in bytes
    pub fn size(self) -> usize {
        self.size_and_type().unsigned_abs() as usize
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// A numeric type a raw field cell can be coerced into
///
/// Conversions follow `as` cast semantics: integers wrap, floats saturate
/// when narrowed to integers.
pub trait FieldValue: Copy + Default {
    fn from_unsigned(value: u64) -> Self;
    fn from_f32(value: f32) -> Self;
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_field_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl FieldValue for $t {
                #[inline]
                fn from_unsigned(value: u64) -> Self {
                    value as $t
                }

                #[inline]
                fn from_f32(value: f32) -> Self {
                    value as $t
                }

                #[inline]
                fn from_f64(value: f64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_field_value!(u8, u16, u32, u64, i8, i16, i32, i64, usize, f32, f64);

impl FieldValue for bool {
    fn from_unsigned(value: u64) -> Self {
        value != 0
    }

    fn from_f32(value: f32) -> Self {
        value != 0.0
    }

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
}

/// Coerce a raw cell into `T`
///
/// `raw` is `None` when the field does not exist in this event shape.
///
/// # Example
/// ```
/// use rastro::field::{coerce, FieldType};
///
/// let bytes = 300u16.to_le_bytes();
/// assert_eq!(coerce::<u64>(Some(&bytes), FieldType::U16), 300);
/// assert_eq!(coerce::<f64>(None, FieldType::U16), 0.0);
/// ```
pub fn coerce<T: FieldValue>(raw: Option<&[u8]>, ty: FieldType) -> T {
    let Some(bytes) = raw else {
        return T::default();
    };

    match ty {
        FieldType::U8 => read_array::<1>(bytes).map(|b| T::from_unsigned(u64::from(b[0]))),
        FieldType::U16 => {
            read_array::<2>(bytes).map(|b| T::from_unsigned(u64::from(u16::from_le_bytes(b))))
        }
        FieldType::U32 => {
            read_array::<4>(bytes).map(|b| T::from_unsigned(u64::from(u32::from_le_bytes(b))))
        }
        FieldType::U64 => read_array::<8>(bytes).map(|b| T::from_unsigned(u64::from_le_bytes(b))),
        FieldType::F32 => read_array::<4>(bytes).map(|b| T::from_f32(f32::from_le_bytes(b))),
        FieldType::F64 => read_array::<8>(bytes).map(|b| T::from_f64(f64::from_le_bytes(b))),
    }
    .unwrap_or_default()
}

#[inline]
fn read_array<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.get(..N)?.try_into().ok()
}
