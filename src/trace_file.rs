//! Trace file container
//!
//! ```text
//!   header  := "RSTR" version:u16 start_cycle:u64 cycle_frequency:u64
//!   record  := 0x01 new_event | 0x02 event
//!
//!   new_event := uid:u16 str(logger) str(name) count:u8 field*
//!   field     := str(name) offset:u16 size:u16 kind:u8 is_array:u8
//!   event     := uid:u16 fixed_len:u16 fixed aux_count:u8 aux* att_len:u32 attachment
//!   aux       := field_index:u8 len:u32 bytes
//!   str       := len:u8 utf8
//! ```
//!
//! All integers are little-endian. A type must be declared before the
//! first event that uses its uid; the reader does not check that, the
//! session does.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::event::{AuxBlob, EventTypeDescriptor, FieldDescriptor, FieldKind, RawEvent};
use crate::session::SessionContext;

pub const MAGIC: [u8; 4] = *b"RSTR";
pub const FORMAT_VERSION: u16 = 1;

const TAG_NEW_EVENT: u8 = 0x01;
const TAG_EVENT: u8 = 0x02;

#[derive(Debug, Error)]
pub enum TraceFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a trace file (magic {0:02x?})")]
    BadMagic([u8; 4]),

    #[error("unsupported trace format version {0}")]
    UnsupportedVersion(u16),

    #[error("trace truncated inside {what} at offset {offset}")]
    Truncated { what: &'static str, offset: u64 },

    #[error("unknown record tag {tag:#04x} at offset {offset}")]
    UnknownRecord { tag: u8, offset: u64 },

    #[error("invalid {what} at offset {offset}: {reason}")]
    Invalid {
        what: &'static str,
        offset: u64,
        reason: String,
    },

    #[error("{what} too large to encode ({len} bytes)")]
    TooLarge { what: &'static str, len: usize },
}

/// One framed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    NewEvent(EventTypeDescriptor),
    Event(RawEvent),
}

/// Streaming reader over a trace file
pub struct TraceReader<R> {
    inner: R,
    offset: u64,
    context: SessionContext,
    finished: bool,
}

impl TraceReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TraceFileError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> TraceReader<R> {
    /// Read and validate the header
    pub fn new(inner: R) -> Result<Self, TraceFileError> {
        let mut reader = Self {
            inner,
            offset: 0,
            context: SessionContext::default(),
            finished: false,
        };

        let mut magic = [0u8; 4];
        reader.fill(&mut magic, "header")?;
        if magic != MAGIC {
            return Err(TraceFileError::BadMagic(magic));
        }
        let version = reader.u16("header")?;
        if version == 0 || version > FORMAT_VERSION {
            return Err(TraceFileError::UnsupportedVersion(version));
        }
        let start_cycle = reader.u64("header")?;
        let cycle_frequency = reader.u64("header")?;
        reader.context = SessionContext::new(start_cycle, cycle_frequency, version);
        tracing::debug!(context = ?reader.context, "trace header read");
        Ok(reader)
    }

    pub fn context(&self) -> SessionContext {
        self.context
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next record, or `None` at a clean end of file
    pub fn next_record(&mut self) -> Result<Option<TraceRecord>, TraceFileError> {
        let start = self.offset;
        let mut tag = [0u8; 1];
        if self.inner.read(&mut tag)? == 0 {
            return Ok(None);
        }
        self.offset += 1;

        match tag[0] {
            TAG_NEW_EVENT => self.new_event().map(|desc| Some(TraceRecord::NewEvent(desc))),
            TAG_EVENT => self.event().map(|event| Some(TraceRecord::Event(event))),
            tag => Err(TraceFileError::UnknownRecord { tag, offset: start }),
        }
    }

    fn new_event(&mut self) -> Result<EventTypeDescriptor, TraceFileError> {
        const WHAT: &str = "event type";
        let uid = self.u16(WHAT)?;
        let logger = self.string(WHAT)?;
        let name = self.string(WHAT)?;
        let count = self.u8(WHAT)?;

        let mut fields = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let field_offset = self.offset;
            let name = self.string(WHAT)?;
            let offset = self.u16(WHAT)?;
            let size = self.u16(WHAT)?;
            let kind_byte = self.u8(WHAT)?;
            let kind = FieldKind::from_u8(kind_byte).ok_or_else(|| TraceFileError::Invalid {
                what: "field kind",
                offset: field_offset,
                reason: format!("kind {kind_byte} in field {name}"),
            })?;
            let is_array = self.u8(WHAT)? != 0;
            fields.push(FieldDescriptor {
                name,
                offset,
                size,
                kind,
                is_array,
            });
        }
        Ok(EventTypeDescriptor {
            uid,
            logger,
            name,
            fields,
        })
    }

    fn event(&mut self) -> Result<RawEvent, TraceFileError> {
        const WHAT: &str = "event";
        let uid = self.u16(WHAT)?;
        let fixed_len = self.u16(WHAT)?;
        let fixed = self.bytes(usize::from(fixed_len), WHAT)?;

        let aux_count = self.u8(WHAT)?;
        let mut aux = Vec::with_capacity(usize::from(aux_count));
        for _ in 0..aux_count {
            let field_index = self.u8(WHAT)?;
            let len = self.u32(WHAT)?;
            aux.push(AuxBlob {
                field_index,
                data: self.bytes(len as usize, WHAT)?,
            });
        }

        let attachment_len = self.u32(WHAT)?;
        let attachment = self.bytes(attachment_len as usize, WHAT)?;
        Ok(RawEvent {
            uid,
            fixed,
            aux,
            attachment,
        })
    }

    fn fill(&mut self, buf: &mut [u8], what: &'static str) -> Result<(), TraceFileError> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Err(TraceFileError::Truncated {
                    what,
                    offset: self.offset,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    fn bytes(&mut self, len: usize, what: &'static str) -> Result<Vec<u8>, TraceFileError> {
        // Sized by the input, not by the (possibly corrupt) declared length
        let mut out = Vec::new();
        let read = (&mut self.inner).take(len as u64).read_to_end(&mut out)?;
        self.offset += read as u64;
        if read < len {
            return Err(TraceFileError::Truncated {
                what,
                offset: self.offset,
            });
        }
        Ok(out)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, TraceFileError> {
        let mut raw = [0u8; 1];
        self.fill(&mut raw, what)?;
        Ok(raw[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, TraceFileError> {
        let mut raw = [0u8; 2];
        self.fill(&mut raw, what)?;
        Ok(u16::from_le_bytes(raw))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, TraceFileError> {
        let mut raw = [0u8; 4];
        self.fill(&mut raw, what)?;
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, TraceFileError> {
        let mut raw = [0u8; 8];
        self.fill(&mut raw, what)?;
        Ok(u64::from_le_bytes(raw))
    }

    fn string(&mut self, what: &'static str) -> Result<String, TraceFileError> {
        let offset = self.offset;
        let len = self.u8(what)?;
        let raw = self.bytes(usize::from(len), what)?;
        String::from_utf8(raw).map_err(|err| TraceFileError::Invalid {
            what: "name",
            offset,
            reason: err.to_string(),
        })
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<TraceRecord, TraceFileError>;

    /// Stops after the first error
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Writes the container format
///
/// # Example
/// ```
/// use rastro::event::{EventPayload, EventTypeDescriptor};
/// use rastro::session::SessionContext;
/// use rastro::trace_file::{TraceReader, TraceRecord, TraceWriter};
///
/// let desc = EventTypeDescriptor::builder(1, "Memory", "Free").u64("Address").build();
/// let mut writer = TraceWriter::new(Vec::new(), SessionContext::new(0, 1_000, 1)).unwrap();
/// writer.declare(&desc).unwrap();
/// writer.event(&EventPayload::new(&desc).set("Address", 16u64).build()).unwrap();
/// let bytes = writer.finish().unwrap();
///
/// let records: Vec<_> = TraceReader::new(bytes.as_slice()).unwrap().collect();
/// assert_eq!(records.len(), 2);
/// assert!(matches!(records[0], Ok(TraceRecord::NewEvent(_))));
/// ```
pub struct TraceWriter<W: Write> {
    inner: W,
}

impl TraceWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(
        path: P,
        context: SessionContext,
    ) -> Result<Self, TraceFileError> {
        Self::new(BufWriter::new(File::create(path)?), context)
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(mut inner: W, context: SessionContext) -> Result<Self, TraceFileError> {
        inner.write_all(&MAGIC)?;
        inner.write_all(&FORMAT_VERSION.to_le_bytes())?;
        inner.write_all(&context.start_cycle.to_le_bytes())?;
        inner.write_all(&context.cycle_frequency.to_le_bytes())?;
        Ok(Self { inner })
    }

    pub fn declare(&mut self, desc: &EventTypeDescriptor) -> Result<(), TraceFileError> {
        let count = u8::try_from(desc.fields.len()).map_err(|_| TraceFileError::TooLarge {
            what: "field list",
            len: desc.fields.len(),
        })?;
        let mut record = vec![TAG_NEW_EVENT];
        record.extend_from_slice(&desc.uid.to_le_bytes());
        push_string(&mut record, &desc.logger)?;
        push_string(&mut record, &desc.name)?;
        record.push(count);
        for field in &desc.fields {
            push_string(&mut record, &field.name)?;
            record.extend_from_slice(&field.offset.to_le_bytes());
            record.extend_from_slice(&field.size.to_le_bytes());
            record.push(field.kind.as_u8());
            record.push(u8::from(field.is_array));
        }
        self.inner.write_all(&record)?;
        Ok(())
    }

    pub fn event(&mut self, event: &RawEvent) -> Result<(), TraceFileError> {
        let fixed_len = u16::try_from(event.fixed.len()).map_err(|_| TraceFileError::TooLarge {
            what: "fixed buffer",
            len: event.fixed.len(),
        })?;
        let aux_count = u8::try_from(event.aux.len()).map_err(|_| TraceFileError::TooLarge {
            what: "aux list",
            len: event.aux.len(),
        })?;

        let mut record = vec![TAG_EVENT];
        record.extend_from_slice(&event.uid.to_le_bytes());
        record.extend_from_slice(&fixed_len.to_le_bytes());
        record.extend_from_slice(&event.fixed);
        record.push(aux_count);
        for blob in &event.aux {
            record.push(blob.field_index);
            push_blob(&mut record, &blob.data, "aux blob")?;
        }
        push_blob(&mut record, &event.attachment, "attachment")?;
        self.inner.write_all(&record)?;
        Ok(())
    }

    /// Flush and hand back the underlying writer
    pub fn finish(mut self) -> Result<W, TraceFileError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn push_string(out: &mut Vec<u8>, value: &str) -> Result<(), TraceFileError> {
    let len = u8::try_from(value.len()).map_err(|_| TraceFileError::TooLarge {
        what: "name",
        len: value.len(),
    })?;
    out.push(len);
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn push_blob(out: &mut Vec<u8>, data: &[u8], what: &'static str) -> Result<(), TraceFileError> {
    let len = u32::try_from(data.len()).map_err(|_| TraceFileError::TooLarge {
        what,
        len: data.len(),
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::field::FieldType;

    fn sample() -> (EventTypeDescriptor, RawEvent, Vec<u8>) {
        let desc = EventTypeDescriptor::builder(9, "Stats", "EventBatch")
            .u32("ThreadId")
            .array("Data", FieldType::U8)
            .ansi_string("Label")
            .build();
        let event = EventPayload::new(&desc)
            .set("ThreadId", 3u32)
            .array("Data", vec![1, 2, 3])
            .string("Label", "render")
            .attachment(vec![0xff; 5])
            .build();

        let mut writer = TraceWriter::new(Vec::new(), SessionContext::new(100, 1_000, 1)).unwrap();
        writer.declare(&desc).unwrap();
        writer.event(&event).unwrap();
        (desc, event, writer.finish().unwrap())
    }

    #[test]
    fn test_reads_back_what_was_written() {
        let (desc, event, bytes) = sample();
        let mut reader = TraceReader::new(bytes.as_slice()).unwrap();

        assert_eq!(reader.context(), SessionContext::new(100, 1_000, 1));
        assert_eq!(reader.next_record().unwrap(), Some(TraceRecord::NewEvent(desc)));
        assert_eq!(reader.next_record().unwrap(), Some(TraceRecord::Event(event)));
        assert_eq!(reader.next_record().unwrap(), None);
        assert_eq!(reader.offset(), bytes.len() as u64);
    }

    #[test]
    fn test_truncation_is_reported() {
        let (_, _, bytes) = sample();
        let cut = &bytes[..bytes.len() - 2];

        let results: Vec<_> = TraceReader::new(cut).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(TraceFileError::Truncated { what: "event", .. })
        ));
    }

    #[test]
    fn test_header_validation() {
        assert!(matches!(
            TraceReader::new(&b"NOPE\x01\x00"[..]),
            Err(TraceFileError::BadMagic(_))
        ));

        let mut future = MAGIC.to_vec();
        future.extend_from_slice(&9u16.to_le_bytes());
        future.extend_from_slice(&[0; 16]);
        assert!(matches!(
            TraceReader::new(future.as_slice()),
            Err(TraceFileError::UnsupportedVersion(9))
        ));

        assert!(matches!(
            TraceReader::new(&b"RST"[..]),
            Err(TraceFileError::Truncated { what: "header", .. })
        ));
    }

    #[test]
    fn test_unknown_record_tag() {
        let mut bytes = TraceWriter::new(Vec::new(), SessionContext::default())
            .unwrap()
            .finish()
            .unwrap();
        let header_len = bytes.len() as u64;
        bytes.push(0x7f);

        let mut reader = TraceReader::new(bytes.as_slice()).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(TraceFileError::UnknownRecord { tag: 0x7f, offset }) if offset == header_len
        ));
    }
}
