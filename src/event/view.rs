use std::marker::PhantomData;

use crate::field::{coerce, FieldType, FieldValue};

use super::descriptor::{EventTypeDescriptor, FieldKind};

/// Out-of-line payload of a string or array field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxBlob {
    pub field_index: u8,
    pub data: Vec<u8>,
}

/// One framed event as read off the stream
///
/// Owns the bytes; analyzers only ever see them through an [`EventView`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub uid: u16,
    pub fixed: Vec<u8>,
    pub aux: Vec<AuxBlob>,
    pub attachment: Vec<u8>,
}

impl RawEvent {
    pub fn view<'a>(&'a self, descriptor: &'a EventTypeDescriptor) -> EventView<'a> {
        EventView {
            descriptor,
            fixed: &self.fixed,
            aux: &self.aux,
            attachment: &self.attachment,
        }
    }
}

/// Read-only, lazily decoded view of one event
///
/// Nothing is decoded until a field is asked for, and nothing is copied
/// out of the underlying buffers except the returned values. A view lives
/// for a single dispatch; keep copies of anything needed afterwards.
#[derive(Debug, Clone, Copy)]
pub struct EventView<'a> {
    descriptor: &'a EventTypeDescriptor,
    fixed: &'a [u8],
    aux: &'a [AuxBlob],
    attachment: &'a [u8],
}

impl<'a> EventView<'a> {
    pub fn descriptor(&self) -> &'a EventTypeDescriptor {
        self.descriptor
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.descriptor.field(name).is_some()
    }

    /// Scalar field coerced to `T`; zero when absent or not numeric
    pub fn get_value<T: FieldValue>(&self, name: &str) -> T {
        let Some((_, field)) = self.descriptor.field(name) else {
            return T::default();
        };
        if field.is_aux() {
            return T::default();
        }
        let Some(ty) = field.field_type() else {
            return T::default();
        };
        let start = field.offset as usize;
        coerce(self.fixed.get(start..start + ty.size()), ty)
    }

    /// Array field as an indexable view; empty when absent
    pub fn get_array<T: FieldValue>(&self, name: &str) -> ArrayView<'a, T> {
        let resolved = self
            .descriptor
            .field(name)
            .filter(|(_, field)| field.is_array)
            .and_then(|(index, field)| Some((self.aux_data(index), field.field_type()?)));

        match resolved {
            Some((data, element)) => ArrayView::new(data, element),
            None => ArrayView::empty(),
        }
    }

    /// String field, or `None` when the event shape has no such field
    ///
    /// Older producers pack strings into the attachment instead, so
    /// `None` tells the caller to fall back to [`EventView::attachment`].
    pub fn get_string(&self, name: &str) -> Option<String> {
        let (index, field) = self.descriptor.field(name)?;
        let data = self.aux_data(index);
        match field.kind {
            FieldKind::AnsiString => Some(String::from_utf8_lossy(data).into_owned()),
            FieldKind::WideString => Some(decode_wide(data)),
            FieldKind::Integer | FieldKind::Float => None,
        }
    }

    /// Out-of-band payload; always valid, possibly empty
    pub fn attachment(&self) -> &'a [u8] {
        self.attachment
    }

    fn aux_data(&self, index: usize) -> &'a [u8] {
        self.aux
            .iter()
            .find(|blob| usize::from(blob.field_index) == index)
            .map(|blob| blob.data.as_slice())
            .unwrap_or(&[])
    }
}

/// Decode a UTF-16LE payload, dropping trailing NULs
pub fn decode_wide(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

/// Indexable view over a packed array field
///
/// Out-of-range indices read as zero, mirroring scalar field semantics.
#[derive(Debug, Clone, Copy)]
pub struct ArrayView<'a, T> {
    data: &'a [u8],
    element: FieldType,
    len: usize,
    _marker: PhantomData<T>,
}

impl<'a, T: FieldValue> ArrayView<'a, T> {
    fn new(data: &'a [u8], element: FieldType) -> Self {
        Self {
            data,
            element,
            len: data.len() / element.size(),
            _marker: PhantomData,
        }
    }

    fn empty() -> Self {
        Self::new(&[], FieldType::U8)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> T {
        if index >= self.len {
            return T::default();
        }
        let size = self.element.size();
        let start = index * size;
        coerce(self.data.get(start..start + size), self.element)
    }

    /// Underlying packed bytes
    pub fn as_bytes(&self) -> &'a [u8] {
        &self.data[..self.len * self.element.size()]
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).map(move |index| self.get(index))
    }
}
