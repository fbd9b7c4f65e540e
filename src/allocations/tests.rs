// Allocation timeline scenarios
//
// Direct edits against the provider, plus a few end-to-end runs through the
// router to check time derivation from markers.

use super::*;
use crate::anomaly::AnomalyKind;
use crate::config::{AnalysisConfig, ReallocTagPolicy};
use crate::event::{EventPayload, EventTypeDescriptor};
use crate::provider::Provider;
use crate::router::EventRouter;
use crate::session::SessionContext;

fn initialized() -> AllocationsProvider {
    let mut timeline = AllocationsProvider::new(SessionContext::default());
    timeline.init(0.0, 8, 0, 0, 0);
    timeline.add_core(0.0, 1, 0x1000, 4096);
    timeline
}

#[test]
fn test_basic_lifecycle() {
    let mut timeline = initialized();
    timeline.alloc(1.0, 1, 0x1010, 64, 8, 0, 5);
    assert!(timeline.free(2.0, 1, 0x1010));

    let at = timeline.live_at(1.5);
    assert_eq!(at.len(), 1);
    assert_eq!(at[0].address, 0x1010);
    assert_eq!(at[0].size, 64);
    assert_eq!(at[0].tag, 5);

    assert!(timeline.live_at(2.5).is_empty());
    assert!(timeline.live_at(0.5).is_empty());
    assert_eq!(timeline.live_count(), 0);
    assert_eq!(timeline.live_bytes(), 0);
    assert_eq!(timeline.peak(), (64, 1.0));
    assert_eq!(timeline.anomalies().total(), 0);
}

#[test]
fn test_realloc_moves_allocation() {
    let mut timeline = initialized();
    let first = timeline.alloc(1.0, 1, 0x1010, 64, 8, 0, 5);
    let second = timeline.realloc(2.0, 1, 0x1010, 0x1100, 128, 8, 0, 5);

    let before = timeline.live_at(1.5);
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].address, 0x1010);

    let after = timeline.live_at(2.5);
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].address, 0x1100);
    assert_eq!(after[0].size, 128);
    assert_eq!(after[0].realloc_of, Some(first));

    assert_eq!(timeline.record(first).unwrap().end_time, Some(2.0));
    assert_eq!(timeline.record(second).unwrap().start_time, 2.0);
    assert_eq!(timeline.live_bytes(), 128);
}

#[test]
fn test_realloc_in_place_keeps_start_time() {
    let mut timeline = initialized();
    let index = timeline.alloc(1.0, 1, 0x1010, 64, 8, 0, 5);
    let resized = timeline.realloc(2.0, 1, 0x1010, 0x1010, 256, 16, 0, 5);

    assert_eq!(index, resized);
    assert_eq!(timeline.records().len(), 1);
    let record = timeline.live_record(0x1010).unwrap();
    assert_eq!(record.start_time, 1.0);
    assert_eq!(record.size, 256);
    assert_eq!(record.alignment, 16);
    assert_eq!(timeline.live_bytes(), 256);
}

#[test]
fn test_in_place_realloc_keeps_earlier_size() {
    let mut timeline = initialized();
    timeline.alloc(1.0, 1, 0x1010, 32, 8, 0, 5);
    timeline.realloc(2.0, 1, 0x1010, 0x1010, 64, 8, 0, 5);

    let before = timeline.live_at(1.5);
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].size_at(1.5), 32);
    assert_eq!(before[0].start_time, 1.0);
    assert_eq!(timeline.live_bytes_in_region(0x1000, 4096, 1.5), 32);
    assert_eq!(timeline.live_bytes_by_tag_at(1.5).get(&5), Some(&32));
    assert_eq!(timeline.summary_at(1.5).live_bytes, 32);

    assert_eq!(timeline.live_bytes_in_region(0x1000, 4096, 2.5), 64);
    assert_eq!(timeline.summary_at(2.5).live_bytes, 64);
    assert_eq!(timeline.peak(), (64, 2.0));
}

#[test]
fn test_free_closes_allocation_at_address_zero() {
    let mut timeline = initialized();
    timeline.alloc(1.0, 1, 0, 16, 8, 0, 0);
    assert!(timeline.free(2.0, 1, 0));

    assert!(timeline.live_at(3.0).is_empty());
    assert_eq!(timeline.live_count(), 0);
    assert_eq!(timeline.anomalies().total(), 0);
}

#[test]
fn test_live_at_now_matches_scan() {
    let mut timeline = initialized();
    timeline.alloc(1.0, 1, 0x1300, 16, 8, 0, 0);
    timeline.alloc(1.0, 1, 0x1100, 16, 8, 0, 0);
    timeline.alloc(2.0, 1, 0x1200, 16, 8, 0, 0);
    timeline.free(3.0, 1, 0x1100);
    timeline.realloc(4.0, 1, 0x1300, 0x1400, 48, 8, 0, 0);

    let now = timeline.current_time();
    let indexed: Vec<u64> = timeline.live_at(now).iter().map(|r| r.address).collect();
    let later: Vec<u64> = timeline.live_at(now + 10.0).iter().map(|r| r.address).collect();
    let scanned: Vec<u64> = timeline
        .records()
        .iter()
        .filter(|record| record.is_live_at(now))
        .map(|record| record.address)
        .collect();

    assert_eq!(indexed, vec![0x1200, 0x1400]);
    assert_eq!(indexed, scanned);
    assert_eq!(later, scanned);
}

#[test]
fn test_duplicate_alloc_closes_previous() {
    let mut timeline = initialized();
    let first = timeline.alloc(1.0, 1, 0x1010, 64, 8, 0, 5);
    timeline.alloc(2.0, 1, 0x1010, 32, 8, 0, 6);

    assert_eq!(timeline.record(first).unwrap().end_time, Some(2.0));
    let live = timeline.live_at(2.5);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].size, 32);
    assert_eq!(timeline.anomalies().count_of(AnomalyKind::DuplicateAlloc), 1);
    assert_eq!(timeline.live_bytes(), 32);
}

#[test]
fn test_unknown_free_and_null_free() {
    let mut timeline = initialized();
    assert!(!timeline.free(1.0, 1, 0));
    assert_eq!(timeline.anomalies().total(), 0);

    assert!(!timeline.free(1.0, 1, 0xdead));
    assert_eq!(timeline.anomalies().count_of(AnomalyKind::UnknownFree), 1);
    assert_eq!(timeline.counts().frees, 2);
}

#[test]
fn test_realloc_from_untracked_address_opens_record() {
    let mut timeline = initialized();
    let index = timeline.realloc(1.0, 1, 0x5000, 0x1200, 48, 8, 0, 2);

    assert_eq!(timeline.record(index).unwrap().realloc_of, None);
    assert_eq!(timeline.live_count(), 1);
    assert_eq!(timeline.anomalies().count_of(AnomalyKind::UnknownRealloc), 1);
}

#[test]
fn test_inherit_policy_keeps_owner_and_tag() {
    let config = AnalysisConfig {
        realloc_tag_policy: ReallocTagPolicy::Inherit,
        ..AnalysisConfig::default()
    };
    let mut timeline = AllocationsProvider::with_config(SessionContext::default(), &config);
    timeline.init(0.0, 8, 0, 0, 0);
    timeline.alloc(1.0, 7, 0x1010, 64, 8, 0, 42);
    let moved = timeline.realloc(2.0, 9, 0x1010, 0x2000, 64, 8, 0, 99);

    let record = timeline.record(moved).unwrap();
    assert_eq!(record.owner, 7);
    assert_eq!(record.tag, 42);

    let mut event_policy = initialized();
    event_policy.alloc(1.0, 7, 0x1010, 64, 8, 0, 42);
    let moved = event_policy.realloc(2.0, 9, 0x1010, 0x2000, 64, 8, 0, 99);
    assert_eq!(event_policy.record(moved).unwrap().tag, 99);
}

#[test]
fn test_region_bytes_and_tags() {
    let mut timeline = initialized();
    timeline.alloc(1.0, 1, 0x1000, 100, 8, 0, 1);
    timeline.alloc(1.0, 1, 0x1100, 200, 8, 0, 2);
    timeline.alloc(1.0, 1, 0x9000, 400, 8, 0, 2);
    timeline.free(3.0, 1, 0x1100);

    assert_eq!(timeline.live_bytes_in_region(0x1000, 0x1000, 2.0), 300);
    assert_eq!(timeline.live_bytes_in_region(0x1000, 0x1000, 3.0), 100);
    assert_eq!(timeline.live_bytes_in_region(0x1000, 0, 2.0), 0);

    let tags = timeline.live_bytes_by_tag_at(2.0);
    assert_eq!(tags.get(&1), Some(&100));
    assert_eq!(tags.get(&2), Some(&600));
}

#[test]
fn test_allocations_outside_cores() {
    let mut timeline = initialized();
    timeline.alloc(1.0, 1, 0x1010, 64, 8, 0, 0);
    timeline.alloc(1.0, 1, 0x1fe0, 64, 8, 0, 0);
    timeline.alloc(1.0, 1, 0x8000, 64, 8, 0, 0);

    let outside: Vec<u64> = timeline
        .outside_cores_at(1.5)
        .iter()
        .map(|record| record.address)
        .collect();
    assert_eq!(outside, vec![0x1fe0, 0x8000]);

    timeline.remove_core(2.0, 1, 0x1000, 4096);
    assert!(timeline.cores_at(2.5).is_empty());
    assert_eq!(timeline.outside_cores_at(2.5).len(), 3);
}

#[test]
fn test_core_anomalies() {
    let mut timeline = initialized();
    timeline.add_core(1.0, 1, 0x1000, 8192);
    timeline.remove_core(2.0, 1, 0x4000, 16);

    let log = timeline.anomalies();
    assert_eq!(log.count_of(AnomalyKind::DuplicateCore), 1);
    assert_eq!(log.count_of(AnomalyKind::UnknownCoreRemove), 1);
    assert_eq!(timeline.cores_at(1.5).len(), 1);
    assert_eq!(timeline.cores_at(1.5)[0].size, 8192);
}

#[test]
fn test_duplicate_init_keeps_first() {
    let mut timeline = initialized();
    timeline.init(1.0, 64, 3, 0, 9);

    assert_eq!(timeline.init_params().min_alignment, 8);
    assert_eq!(timeline.init_params().mode, 0);
    assert_eq!(timeline.anomalies().count_of(AnomalyKind::DuplicateInit), 1);
}

#[test]
fn test_edits_before_init_are_applied() {
    let mut timeline = AllocationsProvider::new(SessionContext::default());
    timeline.alloc(1.0, 1, 0x10, 8, 1, 0, 0);
    timeline.alloc(1.0, 1, 0x20, 8, 1, 0, 0);

    assert_eq!(timeline.live_count(), 2);
    assert!(!timeline.is_initialized());
    assert_eq!(timeline.anomalies().count_of(AnomalyKind::EditBeforeInit), 1);
}

#[test]
fn test_time_regression_clamped() {
    let mut timeline = initialized();
    timeline.alloc(5.0, 1, 0x1010, 64, 8, 0, 0);
    let late = timeline.alloc(3.0, 1, 0x1020, 64, 8, 0, 0);

    assert_eq!(timeline.record(late).unwrap().start_time, 5.0);
    assert_eq!(timeline.current_time(), 5.0);
    assert_eq!(timeline.live_at(4.0).len(), 0);
}

#[test]
fn test_time_regression_unclamped_still_answers() {
    let config = AnalysisConfig {
        clamp_time_regressions: false,
        ..AnalysisConfig::default()
    };
    let mut timeline = AllocationsProvider::with_config(SessionContext::default(), &config);
    timeline.init(0.0, 8, 0, 0, 0);
    timeline.alloc(5.0, 1, 0x1010, 64, 8, 0, 0);
    timeline.alloc(3.0, 1, 0x1020, 64, 8, 0, 0);

    let live: Vec<u64> = timeline.live_at(4.0).iter().map(|r| r.address).collect();
    assert_eq!(live, vec![0x1020]);
}

#[test]
fn test_history_lists_every_lifetime() {
    let mut timeline = initialized();
    timeline.alloc(1.0, 1, 0x1010, 64, 8, 0, 0);
    timeline.free(2.0, 1, 0x1010);
    timeline.alloc(3.0, 1, 0x1010, 32, 8, 0, 0);

    let history = timeline.history(0x1010);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].end_time, Some(2.0));
    assert!(history[1].is_live());
    assert!(timeline.history(0x9999).is_empty());
}

#[test]
fn test_summary_at() {
    let mut timeline = initialized();
    timeline.alloc(1.0, 1, 0x1010, 64, 8, 0, 3);
    timeline.alloc(1.0, 1, 0x8000, 16, 8, 0, 3);

    let summary = timeline.summary_at(2.0);
    assert_eq!(summary.live_count, 2);
    assert_eq!(summary.live_bytes, 80);
    assert_eq!(summary.live_cores, 1);
    assert_eq!(summary.outside_core_count, 1);
    assert_eq!(summary.bytes_by_tag.get(&3), Some(&80));
    assert_eq!(summary.counts.allocs, 2);
    assert_eq!(summary.counts.core_adds, 1);
    assert!(summary.init.is_some());
}

// --- through the router ----------------------------------------------------

fn memory_types() -> Vec<EventTypeDescriptor> {
    vec![
        EventTypeDescriptor::builder(1, MEMORY_LOGGER, "Marker")
            .u64("Cycle")
            .build(),
        EventTypeDescriptor::builder(2, MEMORY_LOGGER, "Init")
            .u8("MinAlignment")
            .u8("SizeShift")
            .u8("SummarySizeShift")
            .u8("Mode")
            .build(),
        EventTypeDescriptor::builder(3, MEMORY_LOGGER, "Alloc")
            .u32("CycleDelta")
            .u64("Address")
            .u32("Size")
            .u8("AlignmentPow2_SizeLower")
            .u32("Tag")
            .build(),
        EventTypeDescriptor::builder(4, MEMORY_LOGGER, "Free")
            .u32("CycleDelta")
            .u64("Address")
            .build(),
    ]
}

#[test]
fn test_analyzer_derives_time_from_marker() {
    let session = SessionContext {
        start_cycle: 1_000,
        cycle_frequency: 100,
        version: 1,
    };
    let provider = Provider::shared(AllocationsProvider::new(session));
    let mut router = EventRouter::new();
    router
        .add_analyzer(Box::new(AllocationsAnalyzer::new(provider.clone())))
        .unwrap();
    router.begin(&session).unwrap();

    let types = memory_types();
    for desc in &types {
        router.declare_type(desc.clone()).unwrap();
    }

    let events = [
        EventPayload::new(&types[1])
            .set("MinAlignment", 8u8)
            .set("SizeShift", 2u8)
            .build(),
        EventPayload::new(&types[0]).set("Cycle", 1_100u64).build(),
        // 0x41 = 65: upper 16, lower 0b01; alignment 2^4
        EventPayload::new(&types[2])
            .set("CycleDelta", 50u32)
            .set("Address", 0x1010u64)
            .set("Size", 16u32)
            .set("AlignmentPow2_SizeLower", (4u8 << 2) | 0b01)
            .set("Tag", 9u32)
            .build(),
        EventPayload::new(&types[0]).set("Cycle", 1_300u64).build(),
        EventPayload::new(&types[3])
            .set("CycleDelta", 0u32)
            .set("Address", 0x1010u64)
            .build(),
    ];
    for event in &events {
        router.dispatch(&session, event).unwrap();
    }
    router.end().unwrap();

    let timeline = provider.read();
    assert_eq!(timeline.records().len(), 1);
    let record = &timeline.records()[0];
    assert_eq!(record.size, 65);
    assert_eq!(record.alignment, 16);
    assert_eq!(record.tag, 9);
    assert!((record.start_time - 1.5).abs() < 1e-9);
    assert_eq!(record.end_time, Some(3.0));
    assert_eq!(timeline.counts().markers, 2);
}
