// Shared fixtures for integration tests
//
// Event layouts shaped like a real producer's, and a builder that writes
// them into an in-memory trace file.
#![allow(dead_code)]

use rastro::event::{EventPayload, EventTypeDescriptor, RawEvent};
use rastro::field::FieldType;
use rastro::session::SessionContext;
use rastro::trace_file::TraceWriter;

/// Cycles per second in every fixture trace
pub const FREQUENCY: u64 = 1_000;

pub fn context() -> SessionContext {
    SessionContext::new(0, FREQUENCY, 1)
}

pub struct Types {
    pub marker: EventTypeDescriptor,
    pub init: EventTypeDescriptor,
    pub core_add: EventTypeDescriptor,
    pub core_remove: EventTypeDescriptor,
    pub alloc: EventTypeDescriptor,
    pub realloc: EventTypeDescriptor,
    pub free: EventTypeDescriptor,
    pub counter_spec: EventTypeDescriptor,
    pub counter_set: EventTypeDescriptor,
    pub counter_add: EventTypeDescriptor,
    pub stat_spec: EventTypeDescriptor,
    pub stat_batch: EventTypeDescriptor,
}

impl Types {
    pub fn all(&self) -> [&EventTypeDescriptor; 12] {
        [
            &self.marker,
            &self.init,
            &self.core_add,
            &self.core_remove,
            &self.alloc,
            &self.realloc,
            &self.free,
            &self.counter_spec,
            &self.counter_set,
            &self.counter_add,
            &self.stat_spec,
            &self.stat_batch,
        ]
    }
}

pub fn types() -> Types {
    Types {
        marker: EventTypeDescriptor::builder(1, "Memory", "Marker")
            .u64("Cycle")
            .build(),
        init: EventTypeDescriptor::builder(2, "Memory", "Init")
            .u8("MinAlignment")
            .u8("SizeShift")
            .u8("SummarySizeShift")
            .u8("Mode")
            .build(),
        core_add: EventTypeDescriptor::builder(3, "Memory", "CoreAdd")
            .u32("CycleDelta")
            .u64("Base")
            .u64("Size")
            .u32("Owner")
            .build(),
        core_remove: EventTypeDescriptor::builder(4, "Memory", "CoreRemove")
            .u32("CycleDelta")
            .u64("Base")
            .u64("Size")
            .u32("Owner")
            .build(),
        alloc: EventTypeDescriptor::builder(5, "Memory", "Alloc")
            .u32("CycleDelta")
            .u64("Address")
            .u32("Size")
            .u8("Alignment")
            .u32("Tag")
            .u32("Owner")
            .build(),
        realloc: EventTypeDescriptor::builder(6, "Memory", "Realloc")
            .u32("CycleDelta")
            .u64("FreeAddress")
            .u64("Address")
            .u32("Size")
            .u8("Alignment")
            .u32("Tag")
            .u32("Owner")
            .build(),
        free: EventTypeDescriptor::builder(7, "Memory", "Free")
            .u32("CycleDelta")
            .u64("Address")
            .u32("Owner")
            .build(),
        counter_spec: EventTypeDescriptor::builder(8, "Counters", "Spec")
            .u16("Id")
            .u8("Type")
            .u8("DisplayHint")
            .wide_string("Name")
            .build(),
        counter_set: EventTypeDescriptor::builder(9, "Counters", "SetValueInt")
            .u64("Cycle")
            .u16("CounterId")
            .u64("Value")
            .build(),
        counter_add: EventTypeDescriptor::builder(10, "Counters", "AddValueInt")
            .u64("Cycle")
            .u16("CounterId")
            .u64("Value")
            .build(),
        stat_spec: EventTypeDescriptor::builder(11, "Stats", "Spec")
            .u32("Id")
            .u8("IsFloatingPoint")
            .u8("IsMemory")
            .ansi_string("Name")
            .build(),
        stat_batch: EventTypeDescriptor::builder(12, "Stats", "EventBatch")
            .u32("ThreadId")
            .u16("BufferSize")
            .array("Data", FieldType::U8)
            .build(),
    }
}

/// Writes fixture events into an in-memory trace
pub struct TraceBuilder {
    pub types: Types,
    writer: TraceWriter<Vec<u8>>,
}

impl TraceBuilder {
    /// Header plus every fixture type declared up front
    pub fn new() -> Self {
        let types = types();
        let mut writer = TraceWriter::new(Vec::new(), context()).unwrap();
        for desc in types.all() {
            writer.declare(desc).unwrap();
        }
        Self { types, writer }
    }

    pub fn raw(&mut self, event: &RawEvent) -> &mut Self {
        self.writer.event(event).unwrap();
        self
    }

    pub fn init(&mut self, min_alignment: u8) -> &mut Self {
        let event = EventPayload::new(&self.types.init)
            .set("MinAlignment", min_alignment)
            .build();
        self.raw(&event)
    }

    /// Re-anchor time at `seconds`
    pub fn marker(&mut self, seconds: f64) -> &mut Self {
        let cycle = (seconds * FREQUENCY as f64) as u64;
        let event = EventPayload::new(&self.types.marker)
            .set("Cycle", cycle)
            .build();
        self.raw(&event)
    }

    pub fn core_add(&mut self, base: u64, size: u64) -> &mut Self {
        let event = EventPayload::new(&self.types.core_add)
            .set("Base", base)
            .set("Size", size)
            .set("Owner", 1u32)
            .build();
        self.raw(&event)
    }

    pub fn alloc(&mut self, address: u64, size: u32, tag: u32) -> &mut Self {
        let event = EventPayload::new(&self.types.alloc)
            .set("Address", address)
            .set("Size", size)
            .set("Alignment", 8u8)
            .set("Tag", tag)
            .set("Owner", 1u32)
            .build();
        self.raw(&event)
    }

    pub fn realloc(&mut self, from: u64, to: u64, size: u32, tag: u32) -> &mut Self {
        let event = EventPayload::new(&self.types.realloc)
            .set("FreeAddress", from)
            .set("Address", to)
            .set("Size", size)
            .set("Alignment", 8u8)
            .set("Tag", tag)
            .set("Owner", 1u32)
            .build();
        self.raw(&event)
    }

    pub fn free(&mut self, address: u64) -> &mut Self {
        let event = EventPayload::new(&self.types.free)
            .set("Address", address)
            .set("Owner", 1u32)
            .build();
        self.raw(&event)
    }

    pub fn counter(&mut self, id: u16, name: &str) -> &mut Self {
        let event = EventPayload::new(&self.types.counter_spec)
            .set("Id", id)
            .wide_string("Name", name)
            .build();
        self.raw(&event)
    }

    pub fn counter_set(&mut self, seconds: f64, id: u16, value: i64) -> &mut Self {
        let event = EventPayload::new(&self.types.counter_set)
            .set("Cycle", (seconds * FREQUENCY as f64) as u64)
            .set("CounterId", id)
            .set("Value", value)
            .build();
        self.raw(&event)
    }

    pub fn stat(&mut self, id: u32, name: &str, is_float: bool) -> &mut Self {
        let event = EventPayload::new(&self.types.stat_spec)
            .set("Id", id)
            .set("IsFloatingPoint", is_float)
            .string("Name", name)
            .build();
        self.raw(&event)
    }

    pub fn stat_batch(&mut self, thread_id: u32, data: Vec<u8>) -> &mut Self {
        let event = EventPayload::new(&self.types.stat_batch)
            .set("ThreadId", thread_id)
            .set("BufferSize", data.len() as u16)
            .array("Data", data)
            .build();
        self.raw(&event)
    }

    pub fn finish(self) -> Vec<u8> {
        self.writer.finish().unwrap()
    }
}
