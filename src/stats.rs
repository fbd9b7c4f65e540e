//! Stats: dense per-thread update batches
//!
//! Producers declare each stat once with `Stats.Spec` and then flush
//! buffered updates as `Stats.EventBatch` events, one byte stream per
//! thread. Cycles inside a batch are deltas chained per thread, so the
//! provider keeps one last-cycle cursor for every thread id it has seen.
//!
//! A batch that fails to decode is dropped whole: no op from it is applied
//! and the thread cursor stays where it was.

mod batch;

pub use batch::{decode_stats_batch, StatOp, StatOpcode, StatUpdate, StatsBatchEncoder};

use fnv::FnvHashMap;
use serde::Serialize;

use crate::anomaly::AnomalyLog;
use crate::config::AnalysisConfig;
use crate::event::{decode_wide, EventView};
use crate::provider::SharedProvider;
use crate::router::{Analyzer, AnalyzerError, EventContext, RouteBuilder, RouteId};
use crate::series::{DisplayHint, SeriesDigest, SeriesTable, SeriesValue, TimeSeries};
use crate::session::SessionContext;
use crate::varint::DecodeError;

pub const STATS_LOGGER: &str = "Stats";

/// Stat series rebuilt from Stats batches
#[derive(Debug)]
pub struct StatsProvider {
    context: SessionContext,
    table: SeriesTable,
    thread_cycles: FnvHashMap<u32, u64>,
    batches: u64,
    corrupt_batches: u64,
    ops: u64,
}

impl StatsProvider {
    pub fn new(context: SessionContext) -> Self {
        Self::with_config(context, &AnalysisConfig::default())
    }

    pub fn with_config(context: SessionContext, config: &AnalysisConfig) -> Self {
        Self {
            context,
            table: SeriesTable::new(config.max_anomalies),
            thread_cycles: FnvHashMap::default(),
            batches: 0,
            corrupt_batches: 0,
            ops: 0,
        }
    }

    pub fn spec(&mut self, id: u32, name: &str, is_float: bool, is_memory: bool) {
        let hint = if is_memory {
            DisplayHint::Memory
        } else {
            DisplayHint::None
        };
        self.table.define(id, name, is_float, hint);
    }

    /// Decode and apply one thread's batch
    ///
    /// `declared_len`, when the producer sent one, must equal the payload
    /// length. Returns the number of ops applied.
    pub fn apply_batch(
        &mut self,
        thread_id: u32,
        data: &[u8],
        declared_len: Option<usize>,
    ) -> Result<usize, DecodeError> {
        self.batches += 1;
        let decoded = match declared_len {
            Some(declared) if declared != data.len() => Err(DecodeError::LengthMismatch {
                declared,
                actual: data.len(),
            }),
            _ => decode_stats_batch(data, self.last_cycle(thread_id)),
        };
        let ops = match decoded {
            Ok(ops) => ops,
            Err(err) => {
                self.corrupt_batches += 1;
                tracing::debug!(thread_id, len = data.len(), error = %err, "stats batch dropped");
                return Err(err);
            }
        };

        if let Some(last) = ops.last() {
            self.thread_cycles.insert(thread_id, last.cycle);
        }
        for op in &ops {
            self.apply(*op);
        }
        Ok(ops.len())
    }

    pub fn apply(&mut self, op: StatOp) {
        let time = self.context.cycle_to_seconds(op.cycle);
        self.ops += 1;
        let is_float = matches!(op.update, StatUpdate::AddFloat(_) | StatUpdate::SetFloat(_));
        let series = self.table.edit(op.id, time, is_float);
        match op.update {
            StatUpdate::Increment => series.add_int(time, 1),
            StatUpdate::Decrement => series.add_int(time, -1),
            StatUpdate::AddInteger(v) => series.add_int(time, v),
            StatUpdate::SetInteger(v) => series.set_int(time, v),
            StatUpdate::AddFloat(v) => series.add_float(time, v),
            StatUpdate::SetFloat(v) => series.set_float(time, v),
        }
    }

    /// Cycle cursor for `thread_id`; zero before its first batch
    pub fn last_cycle(&self, thread_id: u32) -> u64 {
        self.thread_cycles.get(&thread_id).copied().unwrap_or(0)
    }

    pub fn stat(&self, id: u32) -> Option<&TimeSeries> {
        self.table.get(id)
    }

    pub fn find(&self, name: &str) -> Option<&TimeSeries> {
        self.table.find(name)
    }

    pub fn stats(&self) -> impl Iterator<Item = &TimeSeries> {
        self.table.iter()
    }

    pub fn value_at(&self, id: u32, time: f64) -> Option<SeriesValue> {
        self.table.value_at(id, time)
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn corrupt_batches(&self) -> u64 {
        self.corrupt_batches
    }

    pub fn anomalies(&self) -> &AnomalyLog {
        self.table.anomalies()
    }

    pub fn summary(&self, at: Option<f64>) -> StatsSummary {
        StatsSummary {
            batches: self.batches,
            corrupt_batches: self.corrupt_batches,
            ops: self.ops,
            threads: self.thread_cycles.len(),
            anomalies: self.anomalies().total(),
            stats: self.table.digest(at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub batches: u64,
    pub corrupt_batches: u64,
    pub ops: u64,
    pub threads: usize,
    pub anomalies: u64,
    pub stats: Vec<SeriesDigest>,
}

const ROUTE_SPEC: RouteId = 0;
const ROUTE_BATCH: RouteId = 1;

pub struct StatsAnalyzer {
    provider: SharedProvider<StatsProvider>,
}

impl StatsAnalyzer {
    pub fn new(provider: SharedProvider<StatsProvider>) -> Self {
        Self { provider }
    }
}

impl Analyzer for StatsAnalyzer {
    fn name(&self) -> &str {
        "stats"
    }

    fn on_analysis_begin(&mut self, routes: &mut RouteBuilder<'_>) {
        routes.subscribe(ROUTE_SPEC, STATS_LOGGER, "Spec");
        routes.subscribe(ROUTE_BATCH, STATS_LOGGER, "EventBatch");
    }

    fn on_event(
        &mut self,
        route_id: RouteId,
        ctx: &EventContext<'_>,
    ) -> Result<(), AnalyzerError> {
        let event = &ctx.event;
        match route_id {
            ROUTE_SPEC => {
                let name = stat_name(event);
                self.provider.edit().spec(
                    event.get_value("Id"),
                    &name,
                    event.get_value("IsFloatingPoint"),
                    event.get_value("IsMemory"),
                );
            }
            ROUTE_BATCH => {
                let thread_id: u32 = event.get_value("ThreadId");
                let array = event.get_array::<u8>("Data");
                // Older producers ship the batch as the attachment
                let data = if array.is_empty() {
                    event.attachment()
                } else {
                    array.as_bytes()
                };
                let declared = event
                    .has_field("BufferSize")
                    .then(|| event.get_value::<usize>("BufferSize"));
                self.provider
                    .edit()
                    .apply_batch(thread_id, data, declared)?;
            }
            other => tracing::debug!(route = other, "stats: unexpected route"),
        }
        Ok(())
    }

    fn on_analysis_end(&mut self) {
        let stats = self.provider.read();
        tracing::debug!(
            batches = stats.batches(),
            corrupt = stats.corrupt_batches(),
            "stats analysis finished"
        );
    }
}

fn stat_name(event: &EventView<'_>) -> String {
    match event.get_string("Name") {
        Some(name) if !name.is_empty() => name,
        _ => decode_wide(event.attachment()),
    }
}
