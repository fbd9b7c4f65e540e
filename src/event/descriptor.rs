use serde::{Deserialize, Serialize};

use crate::field::FieldType;

/// How a field's bytes are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Float,
    AnsiString,
    WideString,
}

impl FieldKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Integer),
            1 => Some(Self::Float),
            2 => Some(Self::AnsiString),
            3 => Some(Self::WideString),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Integer => 0,
            Self::Float => 1,
            Self::AnsiString => 2,
            Self::WideString => 3,
        }
    }

    pub fn is_string(self) -> bool {
        matches!(self, Self::AnsiString | Self::WideString)
    }
}

/// Layout of one field inside an event's fixed-size buffer
///
/// String and array fields carry no bytes in the fixed buffer; their
/// payload travels as an aux blob tagged with the field's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub offset: u16,
    /// Cell width in bytes. For arrays this is the element width.
    pub size: u16,
    pub kind: FieldKind,
    pub is_array: bool,
}

impl FieldDescriptor {
    /// Numeric storage type, or `None` for string fields and unsupported widths
    pub fn field_type(&self) -> Option<FieldType> {
        match (self.kind, self.size) {
            (FieldKind::Integer, 1) => Some(FieldType::U8),
            (FieldKind::Integer, 2) => Some(FieldType::U16),
            (FieldKind::Integer, 4) => Some(FieldType::U32),
            (FieldKind::Integer, 8) => Some(FieldType::U64),
            (FieldKind::Float, 4) => Some(FieldType::F32),
            (FieldKind::Float, 8) => Some(FieldType::F64),
            _ => None,
        }
    }

    /// Whether the payload lives in an aux blob rather than the fixed buffer
    pub fn is_aux(&self) -> bool {
        self.is_array || self.kind.is_string()
    }
}

/// Type declaration for one event kind within a session
///
/// The uid is session local: the same logger/event pair may get a
/// different uid in another trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeDescriptor {
    pub uid: u16,
    pub logger: String,
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl EventTypeDescriptor {
    /// Start a descriptor whose fields are laid out back to back
    ///
    /// # Example
    /// ```
    /// use rastro::event::EventTypeDescriptor;
    ///
    /// let desc = EventTypeDescriptor::builder(7, "Memory", "Free")
    ///     .u64("Address")
    ///     .u8("Owner")
    ///     .build();
    /// assert_eq!(desc.fixed_size(), 9);
    /// assert_eq!(desc.field("Owner").unwrap().1.offset, 8);
    /// ```
    pub fn builder(
        uid: u16,
        logger: impl Into<String>,
        name: impl Into<String>,
    ) -> EventTypeBuilder {
        EventTypeBuilder {
            desc: EventTypeDescriptor {
                uid,
                logger: logger.into(),
                name: name.into(),
                fields: Vec::new(),
            },
            next_offset: 0,
        }
    }

    /// Linear lookup; event types carry a handful of fields
    pub fn field(&self, name: &str) -> Option<(usize, &FieldDescriptor)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// Bytes needed by the fixed (non-aux) part of an instance
    pub fn fixed_size(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| !f.is_aux())
            .map(|f| f.offset as usize + f.size as usize)
            .max()
            .unwrap_or(0)
    }

    /// `Logger.Event`, as used in diagnostics
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.logger, self.name)
    }
}

/// Sequential layout helper for [`EventTypeDescriptor`]
#[derive(Debug, Clone)]
pub struct EventTypeBuilder {
    desc: EventTypeDescriptor,
    next_offset: u16,
}

impl EventTypeBuilder {
    fn scalar(mut self, name: &str, kind: FieldKind, size: u16) -> Self {
        self.desc.fields.push(FieldDescriptor {
            name: name.to_string(),
            offset: self.next_offset,
            size,
            kind,
            is_array: false,
        });
        self.next_offset += size;
        self
    }

    fn aux(mut self, name: &str, kind: FieldKind, size: u16, is_array: bool) -> Self {
        self.desc.fields.push(FieldDescriptor {
            name: name.to_string(),
            offset: self.next_offset,
            size,
            kind,
            is_array,
        });
        self
    }

    pub fn u8(self, name: &str) -> Self {
        self.scalar(name, FieldKind::Integer, 1)
    }

    pub fn u16(self, name: &str) -> Self {
        self.scalar(name, FieldKind::Integer, 2)
    }

    pub fn u32(self, name: &str) -> Self {
        self.scalar(name, FieldKind::Integer, 4)
    }

    pub fn u64(self, name: &str) -> Self {
        self.scalar(name, FieldKind::Integer, 8)
    }

    pub fn f32(self, name: &str) -> Self {
        self.scalar(name, FieldKind::Float, 4)
    }

    pub fn f64(self, name: &str) -> Self {
        self.scalar(name, FieldKind::Float, 8)
    }

    /// Array of numeric cells of the given storage type
    pub fn array(self, name: &str, element: FieldType) -> Self {
        let kind = if element.is_float() {
            FieldKind::Float
        } else {
            FieldKind::Integer
        };
        self.aux(name, kind, element.size() as u16, true)
    }

    pub fn ansi_string(self, name: &str) -> Self {
        self.aux(name, FieldKind::AnsiString, 1, false)
    }

    pub fn wide_string(self, name: &str) -> Self {
        self.aux(name, FieldKind::WideString, 2, false)
    }

    pub fn build(self) -> EventTypeDescriptor {
        self.desc
    }
}
