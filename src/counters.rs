//! Counters: named values set or adjusted by individual events
//!
//! Producers declare a counter once with a `Counters.Spec` event and then
//! emit `SetValueInt`, `SetValueFloat`, `AddValueInt` and `AddValueFloat`
//! events carrying an absolute `Cycle`, the `CounterId` and the `Value`.

use serde::Serialize;

use crate::anomaly::AnomalyLog;
use crate::config::AnalysisConfig;
use crate::event::{decode_wide, EventView};
use crate::provider::SharedProvider;
use crate::router::{Analyzer, AnalyzerError, EventContext, RouteBuilder, RouteId};
use crate::series::{DisplayHint, SeriesDigest, SeriesTable, SeriesValue, TimeSeries};

pub const COUNTERS_LOGGER: &str = "Counters";

/// Counter series rebuilt from Counters events
#[derive(Debug)]
pub struct CountersProvider {
    table: SeriesTable,
    updates: u64,
}

impl Default for CountersProvider {
    fn default() -> Self {
        Self::with_config(&AnalysisConfig::default())
    }
}

impl CountersProvider {
    pub fn with_config(config: &AnalysisConfig) -> Self {
        Self {
            table: SeriesTable::new(config.max_anomalies),
            updates: 0,
        }
    }

    pub fn spec(&mut self, id: u32, name: &str, is_float: bool, hint: DisplayHint) {
        self.table.define(id, name, is_float, hint);
    }

    pub fn set_int(&mut self, id: u32, time: f64, value: i64) {
        self.updates += 1;
        self.table.edit(id, time, false).set_int(time, value);
    }

    pub fn set_float(&mut self, id: u32, time: f64, value: f64) {
        self.updates += 1;
        self.table.edit(id, time, true).set_float(time, value);
    }

    pub fn add_int(&mut self, id: u32, time: f64, delta: i64) {
        self.updates += 1;
        self.table.edit(id, time, false).add_int(time, delta);
    }

    pub fn add_float(&mut self, id: u32, time: f64, delta: f64) {
        self.updates += 1;
        self.table.edit(id, time, true).add_float(time, delta);
    }

    pub fn counter(&self, id: u32) -> Option<&TimeSeries> {
        self.table.get(id)
    }

    pub fn find(&self, name: &str) -> Option<&TimeSeries> {
        self.table.find(name)
    }

    pub fn counters(&self) -> impl Iterator<Item = &TimeSeries> {
        self.table.iter()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn value_at(&self, id: u32, time: f64) -> Option<SeriesValue> {
        self.table.value_at(id, time)
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn anomalies(&self) -> &AnomalyLog {
        self.table.anomalies()
    }

    pub fn summary(&self, at: Option<f64>) -> CountersSummary {
        CountersSummary {
            updates: self.updates,
            anomalies: self.anomalies().total(),
            counters: self.table.digest(at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountersSummary {
    pub updates: u64,
    pub anomalies: u64,
    pub counters: Vec<SeriesDigest>,
}

mod routes {
    use crate::router::RouteId;

    pub const SPEC: RouteId = 0;
    pub const SET_INT: RouteId = 1;
    pub const SET_FLOAT: RouteId = 2;
    pub const ADD_INT: RouteId = 3;
    pub const ADD_FLOAT: RouteId = 4;
}

pub struct CountersAnalyzer {
    provider: SharedProvider<CountersProvider>,
}

impl CountersAnalyzer {
    pub fn new(provider: SharedProvider<CountersProvider>) -> Self {
        Self { provider }
    }
}

impl Analyzer for CountersAnalyzer {
    fn name(&self) -> &str {
        "counters"
    }

    fn on_analysis_begin(&mut self, routes: &mut RouteBuilder<'_>) {
        routes.subscribe(routes::SPEC, COUNTERS_LOGGER, "Spec");
        routes.subscribe(routes::SET_INT, COUNTERS_LOGGER, "SetValueInt");
        routes.subscribe(routes::SET_FLOAT, COUNTERS_LOGGER, "SetValueFloat");
        routes.subscribe(routes::ADD_INT, COUNTERS_LOGGER, "AddValueInt");
        routes.subscribe(routes::ADD_FLOAT, COUNTERS_LOGGER, "AddValueFloat");
    }

    fn on_event(
        &mut self,
        route_id: RouteId,
        ctx: &EventContext<'_>,
    ) -> Result<(), AnalyzerError> {
        let event = &ctx.event;
        let mut counters = self.provider.edit();

        if route_id == routes::SPEC {
            let id: u32 = event.get_value("Id");
            let name = counter_name(event);
            // Type: 0 integer, 1 float
            let is_float = event.get_value::<u8>("Type") == 1;
            let hint = DisplayHint::from_u8(event.get_value("DisplayHint"));
            tracing::trace!(id, %name, is_float, "counter declared");
            counters.spec(id, &name, is_float, hint);
            return Ok(());
        }

        let time = ctx.session.cycle_to_seconds(event.get_value("Cycle"));
        let id: u32 = event.get_value("CounterId");
        match route_id {
            routes::SET_INT => counters.set_int(id, time, event.get_value("Value")),
            routes::SET_FLOAT => counters.set_float(id, time, event.get_value("Value")),
            routes::ADD_INT => counters.add_int(id, time, event.get_value("Value")),
            routes::ADD_FLOAT => counters.add_float(id, time, event.get_value("Value")),
            other => tracing::debug!(route = other, "counters: unexpected route"),
        }
        Ok(())
    }

    fn on_analysis_end(&mut self) {
        let counters = self.provider.read();
        tracing::debug!(
            counters = counters.len(),
            updates = counters.updates(),
            "counters analysis finished"
        );
    }
}

/// Name field, falling back to a UTF-16 attachment for older producers
fn counter_name(event: &EventView<'_>) -> String {
    match event.get_string("Name") {
        Some(name) if !name.is_empty() => name,
        _ => decode_wide(event.attachment()),
    }
}
