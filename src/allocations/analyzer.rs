use crate::event::EventView;
use crate::provider::SharedProvider;
use crate::router::{Analyzer, AnalyzerError, EventContext, RouteBuilder, RouteId};

use super::record::InitParams;
use super::timeline::AllocationsProvider;

/// Logger that emits allocation events
pub const MEMORY_LOGGER: &str = "Memory";

/// Packed `alignment pow2 | low size bits` byte used by compact producers
const PACKED_ALIGNMENT_FIELD: &str = "AlignmentPow2_SizeLower";

mod routes {
    use crate::router::RouteId;

    pub const INIT: RouteId = 0;
    pub const MARKER: RouteId = 1;
    pub const CORE_ADD: RouteId = 2;
    pub const CORE_REMOVE: RouteId = 3;
    pub const ALLOC: RouteId = 4;
    pub const REALLOC: RouteId = 5;
    pub const FREE: RouteId = 6;
}

/// Feeds `Memory.*` events into an [`AllocationsProvider`]
///
/// Each event is applied under one edit scope. Times come from the most
/// recent Marker plus the event's own `CycleDelta`, unless the event
/// carries an absolute `Cycle`.
pub struct AllocationsAnalyzer {
    provider: SharedProvider<AllocationsProvider>,
}

impl AllocationsAnalyzer {
    pub fn new(provider: SharedProvider<AllocationsProvider>) -> Self {
        Self { provider }
    }
}

impl Analyzer for AllocationsAnalyzer {
    fn name(&self) -> &str {
        "allocations"
    }

    fn on_analysis_begin(&mut self, routes: &mut RouteBuilder<'_>) {
        routes.subscribe(routes::INIT, MEMORY_LOGGER, "Init");
        routes.subscribe(routes::MARKER, MEMORY_LOGGER, "Marker");
        routes.subscribe(routes::CORE_ADD, MEMORY_LOGGER, "CoreAdd");
        routes.subscribe(routes::CORE_REMOVE, MEMORY_LOGGER, "CoreRemove");
        routes.subscribe(routes::ALLOC, MEMORY_LOGGER, "Alloc");
        routes.subscribe(routes::REALLOC, MEMORY_LOGGER, "Realloc");
        routes.subscribe(routes::FREE, MEMORY_LOGGER, "Free");
    }

    fn on_event(
        &mut self,
        route_id: RouteId,
        ctx: &EventContext<'_>,
    ) -> Result<(), AnalyzerError> {
        let event = &ctx.event;
        let mut timeline = self.provider.edit();

        if route_id == routes::MARKER {
            timeline.marker(event.get_value("Cycle"));
            return Ok(());
        }

        let time = match event.get_value::<u64>("Cycle") {
            0 => timeline.time_from_delta(event.get_value("CycleDelta")),
            cycle => ctx.session.cycle_to_seconds(cycle),
        };
        let owner: u32 = event.get_value("Owner");

        match route_id {
            routes::INIT => timeline.init(
                time,
                event.get_value("MinAlignment"),
                event.get_value("SizeShift"),
                event.get_value("SummarySizeShift"),
                event.get_value("Mode"),
            ),
            routes::CORE_ADD => timeline.add_core(
                time,
                owner,
                event.get_value("Base"),
                event.get_value("Size"),
            ),
            routes::CORE_REMOVE => timeline.remove_core(
                time,
                owner,
                event.get_value("Base"),
                event.get_value("Size"),
            ),
            routes::ALLOC => {
                let (size, alignment) = size_and_alignment(event, &timeline.init_params());
                timeline.alloc(
                    time,
                    owner,
                    event.get_value("Address"),
                    size,
                    alignment,
                    event.get_value("Waste"),
                    event.get_value("Tag"),
                );
            }
            routes::REALLOC => {
                let (size, alignment) = size_and_alignment(event, &timeline.init_params());
                timeline.realloc(
                    time,
                    owner,
                    event.get_value("FreeAddress"),
                    event.get_value("Address"),
                    size,
                    alignment,
                    event.get_value("Waste"),
                    event.get_value("Tag"),
                );
            }
            routes::FREE => {
                timeline.free(time, owner, event.get_value("Address"));
            }
            other => tracing::debug!(route = other, "allocations: unexpected route"),
        }
        Ok(())
    }

    fn on_analysis_end(&mut self) {
        let timeline = self.provider.read();
        tracing::debug!(
            live = timeline.live_count(),
            live_bytes = timeline.live_bytes(),
            records = timeline.records().len(),
            anomalies = timeline.anomalies().total(),
            "allocations analysis finished"
        );
    }
}

/// Decode an event's size and alignment
///
/// Compact producers ship `Size >> size_shift` plus one packed byte whose
/// low `size_shift` bits complete the size and whose high bits are the
/// alignment exponent. Older shapes carry a plain `Alignment` field.
pub(crate) fn size_and_alignment(event: &EventView<'_>, params: &InitParams) -> (u64, u32) {
    let raw_size: u64 = event.get_value("Size");
    let (size, alignment) = if event.has_field(PACKED_ALIGNMENT_FIELD) {
        let packed: u8 = event.get_value(PACKED_ALIGNMENT_FIELD);
        let shift = u32::from(params.size_shift.min(7));
        let lower_mask = (1u8 << shift) - 1;
        let size = (raw_size << shift) | u64::from(packed & lower_mask);
        let alignment = 1u32.checked_shl(u32::from(packed >> shift)).unwrap_or(0);
        (size, alignment)
    } else {
        (raw_size, event.get_value::<u32>("Alignment"))
    };
    (size, alignment.max(params.min_alignment))
}
