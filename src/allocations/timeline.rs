use std::collections::BTreeMap;

use fnv::FnvHashMap;
use serde::Serialize;

use crate::anomaly::{AnomalyKind, AnomalyLog};
use crate::config::{AnalysisConfig, ReallocTagPolicy};
use crate::session::SessionContext;

use super::record::{AllocationRecord, CoreRegion, InitParams};

/// Event tallies since the session began
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EditCounts {
    pub allocs: u64,
    pub reallocs: u64,
    pub frees: u64,
    pub core_adds: u64,
    pub core_removes: u64,
    pub markers: u64,
}

/// Point-in-time digest of the allocation timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationSummary {
    pub time: f64,
    pub live_count: usize,
    pub live_bytes: u64,
    pub live_cores: usize,
    pub outside_core_count: usize,
    pub bytes_by_tag: BTreeMap<u32, u64>,
    pub records_total: usize,
    pub peak_live_bytes: u64,
    pub peak_time: f64,
    pub counts: EditCounts,
    pub anomalies: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<InitParams>,
}

/// Allocation timeline rebuilt from Memory events
///
/// Records are kept in creation order. Three indices sit on top of them:
/// the live set (address to open record), the per-address history (ordered
/// by address, so region queries are range scans) and the core list. When
/// event times never go backwards, creation order is also time order and
/// point-in-time queries only look at records created up to that time.
#[derive(Debug)]
pub struct AllocationsProvider {
    context: SessionContext,
    realloc_policy: ReallocTagPolicy,
    clamp_time: bool,
    init: Option<InitParams>,
    reported_uninitialized: bool,
    marker_cycle: u64,
    last_time: f64,
    sorted_by_start: bool,
    records: Vec<AllocationRecord>,
    live: FnvHashMap<u64, usize>,
    by_address: BTreeMap<u64, Vec<usize>>,
    cores: Vec<CoreRegion>,
    live_cores: BTreeMap<u64, usize>,
    live_bytes: u64,
    peak_live_bytes: u64,
    peak_time: f64,
    counts: EditCounts,
    anomalies: AnomalyLog,
}

impl AllocationsProvider {
    pub fn new(context: SessionContext) -> Self {
        Self::with_config(context, &AnalysisConfig::default())
    }

    pub fn with_config(context: SessionContext, config: &AnalysisConfig) -> Self {
        Self {
            context,
            realloc_policy: config.realloc_tag_policy,
            clamp_time: config.clamp_time_regressions,
            init: None,
            reported_uninitialized: false,
            marker_cycle: context.start_cycle,
            last_time: 0.0,
            sorted_by_start: true,
            records: Vec::new(),
            live: FnvHashMap::default(),
            by_address: BTreeMap::new(),
            cores: Vec::new(),
            live_cores: BTreeMap::new(),
            live_bytes: 0,
            peak_live_bytes: 0,
            peak_time: 0.0,
            counts: EditCounts::default(),
            anomalies: AnomalyLog::with_capacity(config.max_anomalies),
        }
    }

    // --- edits -----------------------------------------------------------

    /// One-time configuration; later calls are recorded and ignored
    pub fn init(
        &mut self,
        time: f64,
        min_alignment: u32,
        size_shift: u8,
        summary_size_shift: u8,
        mode: u8,
    ) {
        let time = self.admit(time);
        if let Some(existing) = self.init {
            self.anomalies.record(
                AnomalyKind::DuplicateInit,
                time,
                None,
                format!(
                    "Init repeated (mode {mode}); keeping first configuration (mode {})",
                    existing.mode
                ),
            );
            return;
        }
        let params = InitParams {
            min_alignment: min_alignment.max(1),
            size_shift,
            summary_size_shift,
            mode,
        };
        tracing::debug!(?params, time, "allocations initialized");
        self.init = Some(params);
    }

    /// Re-anchor the time base for events that carry only a cycle delta
    pub fn marker(&mut self, cycle: u64) {
        self.marker_cycle = cycle;
        self.counts.markers += 1;
    }

    pub fn add_core(&mut self, time: f64, owner: u32, base: u64, size: u64) {
        let time = self.admit(time);
        self.require_init(time);
        self.counts.core_adds += 1;

        if let Some(previous) = self.live_cores.get(&base).copied() {
            self.cores[previous].removed_time = Some(time);
            self.anomalies.record(
                AnomalyKind::DuplicateCore,
                time,
                Some(base),
                format!("CoreAdd over live core at {base:#x}; previous region closed"),
            );
        }
        self.live_cores.insert(base, self.cores.len());
        self.cores.push(CoreRegion {
            base,
            size,
            owner,
            added_time: time,
            removed_time: None,
        });
    }

    pub fn remove_core(&mut self, time: f64, owner: u32, base: u64, size: u64) {
        let time = self.admit(time);
        self.require_init(time);
        self.counts.core_removes += 1;

        match self.live_cores.remove(&base) {
            Some(index) => {
                let core = &mut self.cores[index];
                if core.size != size {
                    tracing::debug!(
                        base = %format!("{base:#x}"),
                        registered = core.size,
                        removed = size,
                        "CoreRemove size differs from CoreAdd"
                    );
                }
                core.removed_time = Some(time);
            }
            None => self.anomalies.record(
                AnomalyKind::UnknownCoreRemove,
                time,
                Some(base),
                format!("CoreRemove of unregistered region {base:#x}+{size} (owner {owner})"),
            ),
        }
    }

    /// Open a record at `address`, force-closing any live record there
    ///
    /// Returns the new record's index.
    #[allow(clippy::too_many_arguments)]
    pub fn alloc(
        &mut self,
        time: f64,
        owner: u32,
        address: u64,
        size: u64,
        alignment: u32,
        waste: u32,
        tag: u32,
    ) -> usize {
        let time = self.admit(time);
        self.require_init(time);
        self.counts.allocs += 1;

        self.evict(time, address, "Alloc");
        self.open(AllocationRecord {
            address,
            size,
            alignment,
            waste,
            owner,
            tag,
            start_time: time,
            end_time: None,
            realloc_of: None,
            resizes: Vec::new(),
        })
    }

    /// Move or resize an allocation
    ///
    /// Same address: the live record is resized in place and keeps its
    /// creation time. Different address: the old record (if any) is closed
    /// and a new one opened. Returns the index of the resulting live record.
    #[allow(clippy::too_many_arguments)]
    pub fn realloc(
        &mut self,
        time: f64,
        owner: u32,
        free_address: u64,
        new_address: u64,
        size: u64,
        alignment: u32,
        waste: u32,
        tag: u32,
    ) -> usize {
        let time = self.admit(time);
        self.require_init(time);
        self.counts.reallocs += 1;

        let previous = self.live.get(&free_address).copied();
        if let (Some(index), true) = (previous, free_address == new_address) {
            self.resize(index, time, size, alignment, waste);
            return index;
        }

        let (owner, tag) = match (previous, self.realloc_policy) {
            (Some(index), ReallocTagPolicy::Inherit) => {
                let old = &self.records[index];
                (old.owner, old.tag)
            }
            _ => (owner, tag),
        };

        match previous {
            Some(index) => self.close(index, time),
            None => self.anomalies.record(
                AnomalyKind::UnknownRealloc,
                time,
                Some(free_address),
                format!("Realloc from untracked address {free_address:#x}"),
            ),
        }

        self.evict(time, new_address, "Realloc");
        self.open(AllocationRecord {
            address: new_address,
            size,
            alignment,
            waste,
            owner,
            tag,
            start_time: time,
            end_time: None,
            realloc_of: previous,
            resizes: Vec::new(),
        })
    }

    /// Close the live record at `address`; returns whether one existed
    pub fn free(&mut self, time: f64, owner: u32, address: u64) -> bool {
        let time = self.admit(time);
        self.require_init(time);
        self.counts.frees += 1;

        match self.live.get(&address).copied() {
            Some(index) => {
                self.close(index, time);
                true
            }
            // free(NULL) is legal when nothing lives at 0
            None if address == 0 => false,
            None => {
                self.anomalies.record(
                    AnomalyKind::UnknownFree,
                    time,
                    Some(address),
                    format!("Free of untracked address {address:#x} (owner {owner})"),
                );
                false
            }
        }
    }

    // --- time ------------------------------------------------------------

    /// Session time of an event `delta_cycles` after the last marker
    pub fn time_from_delta(&self, delta_cycles: u64) -> f64 {
        self.context
            .cycle_to_seconds(self.marker_cycle.saturating_add(delta_cycles))
    }

    pub fn marker_cycle(&self) -> u64 {
        self.marker_cycle
    }

    /// Latest event time applied so far
    pub fn current_time(&self) -> f64 {
        self.last_time
    }

    // --- queries ---------------------------------------------------------

    pub fn init_params(&self) -> InitParams {
        self.init.unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.init.is_some()
    }

    pub fn records(&self) -> &[AllocationRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&AllocationRecord> {
        self.records.get(index)
    }

    /// The currently live record at `address`
    pub fn live_record(&self, address: u64) -> Option<&AllocationRecord> {
        self.live.get(&address).map(|&index| &self.records[index])
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// Highest live byte total seen and when it was reached
    pub fn peak(&self) -> (u64, f64) {
        (self.peak_live_bytes, self.peak_time)
    }

    pub fn counts(&self) -> EditCounts {
        self.counts
    }

    pub fn anomalies(&self) -> &AnomalyLog {
        &self.anomalies
    }

    /// Every allocation alive at `time`, in creation order
    pub fn live_at(&self, time: f64) -> Vec<&AllocationRecord> {
        if time >= self.last_time {
            let mut indices: Vec<usize> = self.live.values().copied().collect();
            indices.sort_unstable();
            return indices.into_iter().map(|index| &self.records[index]).collect();
        }
        self.created_by(time)
            .iter()
            .filter(|record| record.is_live_at(time))
            .collect()
    }

    /// All records ever opened at `address`, oldest first
    pub fn history(&self, address: u64) -> Vec<&AllocationRecord> {
        self.by_address
            .get(&address)
            .map(|indices| indices.iter().map(|&index| &self.records[index]).collect())
            .unwrap_or_default()
    }

    /// Bytes of allocations starting in `[base, base + size)` alive at `time`
    pub fn live_bytes_in_region(&self, base: u64, size: u64, time: f64) -> u64 {
        let end = base.saturating_add(size);
        if end <= base {
            return 0;
        }
        self.by_address
            .range(base..end)
            .flat_map(|(_, indices)| indices.iter())
            .map(|&index| &self.records[index])
            .filter(|record| record.is_live_at(time))
            .map(|record| record.size_at(time))
            .sum()
    }

    pub fn cores(&self) -> &[CoreRegion] {
        &self.cores
    }

    /// Core regions mapped at `time`, ordered by base address
    pub fn cores_at(&self, time: f64) -> Vec<&CoreRegion> {
        let mut cores: Vec<&CoreRegion> = self
            .cores
            .iter()
            .filter(|core| core.is_live_at(time))
            .collect();
        cores.sort_by_key(|core| core.base);
        cores
    }

    /// Live allocations at `time` not contained by any live core
    pub fn outside_cores_at(&self, time: f64) -> Vec<&AllocationRecord> {
        let cores = self.cores_at(time);
        self.live_at(time)
            .into_iter()
            .filter(|record| {
                let slot = cores.partition_point(|core| core.base <= record.address);
                slot == 0
                    || !cores[slot - 1].contains_range(record.address, record.size_at(time))
            })
            .collect()
    }

    /// Live bytes per tag at `time`
    pub fn live_bytes_by_tag_at(&self, time: f64) -> BTreeMap<u32, u64> {
        let mut totals = BTreeMap::new();
        for record in self.live_at(time) {
            *totals.entry(record.tag).or_insert(0) += record.size_at(time);
        }
        totals
    }

    pub fn summary_at(&self, time: f64) -> AllocationSummary {
        let live = self.live_at(time);
        AllocationSummary {
            time,
            live_count: live.len(),
            live_bytes: live.iter().map(|record| record.size_at(time)).sum(),
            live_cores: self.cores_at(time).len(),
            outside_core_count: self.outside_cores_at(time).len(),
            bytes_by_tag: self.live_bytes_by_tag_at(time),
            records_total: self.records.len(),
            peak_live_bytes: self.peak_live_bytes,
            peak_time: self.peak_time,
            counts: self.counts,
            anomalies: self.anomalies.total(),
            init: self.init,
        }
    }

    // --- internals -------------------------------------------------------

    fn admit(&mut self, time: f64) -> f64 {
        if time >= self.last_time {
            self.last_time = time;
            return time;
        }
        if self.clamp_time {
            tracing::trace!(time, last = self.last_time, "event time clamped");
            return self.last_time;
        }
        self.sorted_by_start = false;
        time
    }

    fn require_init(&mut self, time: f64) {
        if self.init.is_some() || self.reported_uninitialized {
            return;
        }
        self.reported_uninitialized = true;
        self.anomalies.record(
            AnomalyKind::EditBeforeInit,
            time,
            None,
            "allocation events before Init; using default parameters",
        );
    }

    fn created_by(&self, time: f64) -> &[AllocationRecord] {
        if self.sorted_by_start {
            let end = self
                .records
                .partition_point(|record| record.start_time <= time);
            &self.records[..end]
        } else {
            &self.records
        }
    }

    fn evict(&mut self, time: f64, address: u64, op: &str) {
        let Some(index) = self.live.get(&address).copied() else {
            return;
        };
        let size = self.records[index].size;
        self.close(index, time);
        self.anomalies.record(
            AnomalyKind::DuplicateAlloc,
            time,
            Some(address),
            format!("{op} over live allocation at {address:#x} (size {size}); previous record closed"),
        );
    }

    fn open(&mut self, record: AllocationRecord) -> usize {
        let index = self.records.len();
        self.live.insert(record.address, index);
        self.by_address.entry(record.address).or_default().push(index);
        self.live_bytes = self.live_bytes.saturating_add(record.size);
        self.note_peak(record.start_time);
        self.records.push(record);
        index
    }

    fn close(&mut self, index: usize, time: f64) {
        let record = &mut self.records[index];
        record.end_time = Some(time);
        self.live.remove(&record.address);
        self.live_bytes = self.live_bytes.saturating_sub(record.size);
    }

    fn resize(&mut self, index: usize, time: f64, size: u64, alignment: u32, waste: u32) {
        let record = &mut self.records[index];
        self.live_bytes = self
            .live_bytes
            .saturating_sub(record.size)
            .saturating_add(size);
        record.resizes.push((time, record.size));
        record.size = size;
        record.alignment = alignment;
        record.waste = waste;
        self.note_peak(time);
    }

    fn note_peak(&mut self, time: f64) {
        if self.live_bytes > self.peak_live_bytes {
            self.peak_live_bytes = self.live_bytes;
            self.peak_time = time;
        }
    }
}
