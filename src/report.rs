//! Summary output: plain text for terminals, JSON for tools

use std::io::{self, Write};

use serde::Serialize;

use crate::replay::ReplayStats;
use crate::series::{DisplayHint, SeriesDigest};
use crate::session::AnalysisSummary;

/// Anomalies listed in text output before the rest are elided
const TEXT_ANOMALY_LIMIT: usize = 20;

/// Root JSON document
#[derive(Debug, Clone, Serialize)]
pub struct JsonReport<'a> {
    /// Crate version that produced the report
    pub version: &'static str,
    /// Format name
    pub format: &'static str,
    pub trace: &'a str,
    pub replay: ReplayStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
    pub summary: &'a AnalysisSummary,
}

impl<'a> JsonReport<'a> {
    pub fn new(trace: &'a str, replay: ReplayStats, summary: &'a AnalysisSummary) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            format: "rastro-json-v1",
            trace,
            replay,
            read_error: None,
            summary,
        }
    }

    pub fn with_read_error(mut self, error: Option<String>) -> Self {
        self.read_error = error;
        self
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Human readable summary
pub fn write_text<W: Write>(
    out: &mut W,
    trace: &str,
    replay: &ReplayStats,
    summary: &AnalysisSummary,
) -> io::Result<()> {
    let ctx = &summary.context;
    writeln!(out, "=== {trace} ===")?;
    writeln!(
        out,
        "format v{}, start cycle {}, {} cycles/s",
        ctx.version, ctx.start_cycle, ctx.cycle_frequency
    )?;
    writeln!(
        out,
        "{} records: {} event types, {} events",
        replay.records, replay.types, replay.events
    )?;

    if let Some(alloc) = &summary.allocations {
        writeln!(out)?;
        writeln!(out, "--- allocations at {:.6}s ---", alloc.time)?;
        writeln!(
            out,
            "live: {} allocations, {} (peak {} at {:.6}s)",
            alloc.live_count,
            format_bytes(alloc.live_bytes),
            format_bytes(alloc.peak_live_bytes),
            alloc.peak_time
        )?;
        writeln!(
            out,
            "cores: {} live, {} allocations outside any core",
            alloc.live_cores, alloc.outside_core_count
        )?;
        let counts = &alloc.counts;
        writeln!(
            out,
            "edits: {} alloc, {} realloc, {} free, {} core add, {} core remove, {} marker",
            counts.allocs,
            counts.reallocs,
            counts.frees,
            counts.core_adds,
            counts.core_removes,
            counts.markers
        )?;
        if !alloc.bytes_by_tag.is_empty() {
            writeln!(out, "{:>10}  {:>12}", "tag", "live bytes")?;
            for (tag, bytes) in &alloc.bytes_by_tag {
                writeln!(out, "{tag:>10}  {bytes:>12}")?;
            }
        }
    }

    if let Some(counters) = &summary.counters {
        writeln!(out)?;
        writeln!(out, "--- counters ({} updates) ---", counters.updates)?;
        write_series(out, &counters.counters)?;
    }

    if let Some(stats) = &summary.stats {
        writeln!(out)?;
        writeln!(
            out,
            "--- stats ({} batches, {} corrupt, {} threads) ---",
            stats.batches, stats.corrupt_batches, stats.threads
        )?;
        write_series(out, &stats.stats)?;
    }

    let counts = &summary.anomaly_counts;
    writeln!(out)?;
    writeln!(
        out,
        "--- anomalies: {} ({} high, {} medium, {} low, {} not retained) ---",
        counts.total, counts.high, counts.medium, counts.low, counts.dropped
    )?;
    for anomaly in summary.anomalies.iter().take(TEXT_ANOMALY_LIMIT) {
        writeln!(
            out,
            "{:>12.6}s  {:<7} {}",
            anomaly.time,
            format!("{:?}", anomaly.severity),
            anomaly.message
        )?;
    }
    if summary.anomalies.len() > TEXT_ANOMALY_LIMIT {
        writeln!(out, "... {} more", summary.anomalies.len() - TEXT_ANOMALY_LIMIT)?;
    }

    if !summary.diagnostics.is_empty() {
        writeln!(out)?;
        writeln!(out, "--- diagnostics ---")?;
        for diagnostic in &summary.diagnostics {
            if diagnostic.count > 1 {
                writeln!(out, "{} (x{})", diagnostic.message, diagnostic.count)?;
            } else {
                writeln!(out, "{}", diagnostic.message)?;
            }
        }
    }
    Ok(())
}

fn write_series<W: Write>(out: &mut W, series: &[SeriesDigest]) -> io::Result<()> {
    if series.is_empty() {
        return writeln!(out, "(none)");
    }
    for digest in series {
        let value = match digest.hint {
            DisplayHint::Memory => format_bytes(digest.value.as_i64().max(0) as u64),
            DisplayHint::None => digest.value.to_string(),
        };
        write!(out, "{:>6}  {:<32} {value:>14}", digest.id, digest.name)?;
        match digest.value_at {
            Some(at) => writeln!(out, "  (at t: {at})")?,
            None => writeln!(out)?,
        }
    }
    Ok(())
}

/// `1536` -> `1.50 KiB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
