//! Event type descriptors and zero-copy event views
//!
//! A trace declares each event kind once (logger name, event name, field
//! layout) under a session-local uid. Every instance that follows is a raw
//! byte buffer decoded lazily through that declaration.

mod descriptor;
mod payload;
mod view;

pub use descriptor::{EventTypeBuilder, EventTypeDescriptor, FieldDescriptor, FieldKind};
pub use payload::{CellValue, EventPayload};
pub use view::{decode_wide, ArrayView, AuxBlob, EventView, RawEvent};
