use serde::Serialize;

/// Parameters from the producer's Init event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitParams {
    pub min_alignment: u32,
    /// Bits of the allocation size carried in the packed alignment byte
    pub size_shift: u8,
    pub summary_size_shift: u8,
    pub mode: u8,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            min_alignment: 1,
            size_shift: 0,
            summary_size_shift: 0,
            mode: 0,
        }
    }
}

/// One allocation's lifetime
///
/// `end_time` is `None` while the allocation is alive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationRecord {
    pub address: u64,
    pub size: u64,
    pub alignment: u32,
    pub waste: u32,
    pub owner: u32,
    pub tag: u32,
    pub start_time: f64,
    pub end_time: Option<f64>,
    /// Index of the record this one replaced through a moving realloc
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realloc_of: Option<usize>,
    /// In-place resizes as (time, size before the resize), oldest first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resizes: Vec<(f64, u64)>,
}

impl AllocationRecord {
    /// Alive over `[start_time, end_time)`
    pub fn is_live_at(&self, time: f64) -> bool {
        self.start_time <= time && self.end_time.map_or(true, |end| time < end)
    }

    pub fn is_live(&self) -> bool {
        self.end_time.is_none()
    }

    /// Size in effect at `time`; `size` is the latest
    pub fn size_at(&self, time: f64) -> u64 {
        self.resizes
            .iter()
            .find(|&&(resized, _)| time < resized)
            .map_or(self.size, |&(_, before)| before)
    }

    /// One past the last byte
    pub fn end_address(&self) -> u64 {
        self.address.saturating_add(self.size)
    }
}

/// A virtual address range backing allocations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreRegion {
    pub base: u64,
    pub size: u64,
    pub owner: u32,
    pub added_time: f64,
    pub removed_time: Option<f64>,
}

impl CoreRegion {
    pub fn is_live_at(&self, time: f64) -> bool {
        self.added_time <= time && self.removed_time.map_or(true, |end| time < end)
    }

    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    /// Whether `[address, address + size)` lies inside this region
    pub fn contains_range(&self, address: u64, size: u64) -> bool {
        address >= self.base && address.saturating_add(size) <= self.end()
    }
}
