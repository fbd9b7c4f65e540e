//! End-to-end allocation timeline reconstruction
//!
//! Traces are written with the fixture builder, replayed through the
//! reader thread and the router, and the published provider is queried.

mod utils;

use rastro::allocations::AllocationsProvider;
use rastro::anomaly::AnomalyKind;
use rastro::config::{AnalysisConfig, ReallocTagPolicy};
use rastro::provider::{keys, Provider};
use rastro::replay::{Replay, ReplayOutcome};
use rastro::trace_file::TraceReader;
use utils::TraceBuilder;

fn replay(bytes: Vec<u8>, config: AnalysisConfig) -> ReplayOutcome {
    let reader = TraceReader::new(std::io::Cursor::new(bytes)).unwrap();
    Replay::new(config).run(reader).unwrap()
}

fn timeline(outcome: &ReplayOutcome) -> std::sync::Arc<Provider<AllocationsProvider>> {
    outcome
        .session
        .providers()
        .get::<Provider<AllocationsProvider>>(keys::ALLOCATIONS)
        .unwrap()
}

#[test]
fn test_basic_lifecycle() {
    let mut trace = TraceBuilder::new();
    trace
        .init(8)
        .core_add(0x1000, 4096)
        .marker(1.0)
        .alloc(0x1010, 64, 5)
        .marker(2.0)
        .free(0x1010);
    let outcome = replay(trace.finish(), AnalysisConfig::default());

    let provider = timeline(&outcome);
    let timeline = provider.read();
    let live = timeline.live_at(1.5);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].address, 0x1010);
    assert_eq!(live[0].size, 64);
    assert_eq!(live[0].tag, 5);
    assert!(timeline.live_at(2.5).is_empty());
    assert_eq!(timeline.anomalies().total(), 0);
}

#[test]
fn test_realloc_move() {
    let mut trace = TraceBuilder::new();
    trace
        .init(8)
        .marker(1.0)
        .alloc(0xa000, 64, 1)
        .marker(2.0)
        .realloc(0xa000, 0xb000, 128, 1);
    let outcome = replay(trace.finish(), AnalysisConfig::default());

    let provider = timeline(&outcome);
    let timeline = provider.read();
    let before: Vec<u64> = timeline.live_at(1.5).iter().map(|r| r.address).collect();
    let after: Vec<(u64, u64)> = timeline
        .live_at(2.5)
        .iter()
        .map(|r| (r.address, r.size))
        .collect();
    assert_eq!(before, vec![0xa000]);
    assert_eq!(after, vec![(0xb000, 128)]);
}

#[test]
fn test_duplicate_alloc_anomaly() {
    let mut trace = TraceBuilder::new();
    trace
        .init(8)
        .marker(1.0)
        .alloc(0xa000, 64, 1)
        .marker(2.0)
        .alloc(0xa000, 32, 1);
    let outcome = replay(trace.finish(), AnalysisConfig::default());

    let provider = timeline(&outcome);
    let timeline = provider.read();
    let history = timeline.history(0xa000);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].end_time, Some(2.0));
    assert_eq!(timeline.live_at(2.5).len(), 1);
    assert_eq!(timeline.live_at(2.5)[0].size, 32);
    assert_eq!(timeline.anomalies().count_of(AnomalyKind::DuplicateAlloc), 1);
    assert_eq!(outcome.summary.anomaly_counts.high, 1);
}

#[test]
fn test_same_address_realloc_keeps_creation_time() {
    let mut trace = TraceBuilder::new();
    trace
        .init(8)
        .marker(1.0)
        .alloc(0xa000, 64, 1)
        .marker(3.0)
        .realloc(0xa000, 0xa000, 512, 1);
    let outcome = replay(trace.finish(), AnalysisConfig::default());

    let provider = timeline(&outcome);
    let timeline = provider.read();
    let record = timeline.live_record(0xa000).unwrap();
    assert_eq!(record.start_time, 1.0);
    assert_eq!(record.size, 512);
    assert_eq!(record.size_at(2.0), 64);
    assert_eq!(timeline.summary_at(2.0).live_bytes, 64);
    assert_eq!(timeline.summary_at(3.5).live_bytes, 512);
    assert_eq!(timeline.records().len(), 1);
}

#[test]
fn test_inherit_policy_from_config() {
    let config = AnalysisConfig::from_toml_str("realloc_tag_policy = \"inherit\"").unwrap();
    assert_eq!(config.realloc_tag_policy, ReallocTagPolicy::Inherit);

    let mut trace = TraceBuilder::new();
    trace
        .init(8)
        .marker(1.0)
        .alloc(0xa000, 64, 11)
        .marker(2.0)
        .realloc(0xa000, 0xb000, 64, 22);
    let outcome = replay(trace.finish(), config);

    let provider = timeline(&outcome);
    assert_eq!(provider.read().live_record(0xb000).unwrap().tag, 11);
}

#[test]
fn test_region_and_core_queries() {
    let mut trace = TraceBuilder::new();
    trace
        .init(8)
        .core_add(0x10000, 0x1000)
        .marker(1.0)
        .alloc(0x10000, 100, 1)
        .alloc(0x10400, 200, 2)
        .alloc(0x20000, 50, 2)
        .marker(2.0)
        .free(0x10400);
    let outcome = replay(trace.finish(), AnalysisConfig::default());

    let provider = timeline(&outcome);
    let timeline = provider.read();
    assert_eq!(timeline.live_bytes_in_region(0x10000, 0x1000, 1.5), 300);
    assert_eq!(timeline.live_bytes_in_region(0x10000, 0x1000, 2.5), 100);

    let outside: Vec<u64> = timeline
        .outside_cores_at(1.5)
        .iter()
        .map(|r| r.address)
        .collect();
    assert_eq!(outside, vec![0x20000]);
    assert_eq!(timeline.peak(), (350, 1.0));
}

#[test]
fn test_at_most_one_live_record_per_address() {
    let mut trace = TraceBuilder::new();
    trace.init(8);
    for step in 0..50u64 {
        trace.marker(step as f64 * 0.1);
        let address = 0x1000 + (step % 7) * 0x10;
        match step % 3 {
            0 => trace.alloc(address, 16, 0),
            1 => trace.realloc(address, 0x1000 + (step % 5) * 0x10, 32, 0),
            _ => trace.free(address),
        };
    }
    let outcome = replay(trace.finish(), AnalysisConfig::default());

    let provider = timeline(&outcome);
    let timeline = provider.read();
    for tenth in 0..60 {
        let time = f64::from(tenth) * 0.1 + 0.05;
        let mut addresses: Vec<u64> = timeline.live_at(time).iter().map(|r| r.address).collect();
        let before = addresses.len();
        addresses.sort_unstable();
        addresses.dedup();
        assert_eq!(addresses.len(), before, "duplicate live address at t={time}");
    }
}
