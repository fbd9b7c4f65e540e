//! Allocation timeline reconstruction
//!
//! Rebuilds every allocation's lifetime from an ordered log of
//! Init / CoreAdd / CoreRemove / Alloc / Realloc / Free / Marker events and
//! answers point-in-time and range queries over it.
//!
//! # Example
//!
//! ```
//! use rastro::allocations::AllocationsProvider;
//! use rastro::session::SessionContext;
//!
//! let mut timeline = AllocationsProvider::new(SessionContext::default());
//! timeline.init(0.0, 8, 0, 0, 0);
//! timeline.add_core(0.0, 1, 0x1000, 4096);
//! timeline.alloc(1.0, 1, 0x1010, 64, 8, 0, 5);
//! timeline.free(2.0, 1, 0x1010);
//!
//! assert_eq!(timeline.live_at(1.5).len(), 1);
//! assert!(timeline.live_at(2.5).is_empty());
//! ```

mod analyzer;
mod record;
mod timeline;

pub use analyzer::{AllocationsAnalyzer, MEMORY_LOGGER};
pub use record::{AllocationRecord, CoreRegion, InitParams};
pub use timeline::{AllocationSummary, AllocationsProvider, EditCounts};

#[cfg(test)]
mod tests;
