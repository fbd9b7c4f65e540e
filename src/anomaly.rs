//! Recoverable protocol anomalies observed while rebuilding state
//!
//! Reconstruction is best effort: a duplicate Alloc, a Free of an address
//! nobody allocated, a second Init all leave the provider in a usable state
//! and are recorded here for diagnostic display instead of aborting.

use serde::Serialize;

/// Anomaly severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AnomalySeverity {
    /// Expected at trace boundaries (e.g. frees of pre-capture allocations)
    Low,
    /// Producer protocol was not followed but state stayed consistent
    Medium,
    /// State had to be repaired (records force-closed, events dropped)
    High,
}

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    DuplicateInit,
    EditBeforeInit,
    DuplicateAlloc,
    UnknownFree,
    UnknownRealloc,
    DuplicateCore,
    UnknownCoreRemove,
    UnknownSeries,
}

impl AnomalyKind {
    pub fn severity(self) -> AnomalySeverity {
        match self {
            Self::UnknownFree | Self::UnknownRealloc | Self::UnknownSeries => AnomalySeverity::Low,
            Self::DuplicateInit | Self::EditBeforeInit | Self::UnknownCoreRemove => {
                AnomalySeverity::Medium
            }
            Self::DuplicateAlloc | Self::DuplicateCore => AnomalySeverity::High,
        }
    }
}

/// One recorded anomaly
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    /// Session time in seconds
    pub time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
    pub message: String,
}

/// Bounded anomaly log
///
/// Past `capacity` entries new anomalies are still counted (and logged)
/// but not stored.
#[derive(Debug, Clone)]
pub struct AnomalyLog {
    entries: Vec<Anomaly>,
    capacity: usize,
    dropped: u64,
}

impl Default for AnomalyLog {
    fn default() -> Self {
        Self::with_capacity(AnomalyLog::DEFAULT_CAPACITY)
    }
}

impl AnomalyLog {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            dropped: 0,
        }
    }

    pub fn record(
        &mut self,
        kind: AnomalyKind,
        time: f64,
        address: Option<u64>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let shown = address.map_or_else(|| "-".to_string(), |a| format!("{a:#x}"));
        tracing::warn!(kind = ?kind, time, address = %shown, "{message}");
        if self.entries.len() >= self.capacity {
            self.dropped += 1;
            return;
        }
        self.entries.push(Anomaly {
            kind,
            severity: kind.severity(),
            time,
            address,
            message,
        });
    }

    pub fn entries(&self) -> &[Anomaly] {
        &self.entries
    }

    /// Recorded plus dropped
    pub fn total(&self) -> u64 {
        self.entries.len() as u64 + self.dropped
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn count_of(&self, kind: AnomalyKind) -> usize {
        self.entries.iter().filter(|a| a.kind == kind).count()
    }

    /// (low, medium, high) counts over stored entries
    pub fn severity_counts(&self) -> (usize, usize, usize) {
        self.entries
            .iter()
            .fold((0, 0, 0), |(low, medium, high), a| match a.severity {
                AnomalySeverity::Low => (low + 1, medium, high),
                AnomalySeverity::Medium => (low, medium + 1, high),
                AnomalySeverity::High => (low, medium, high + 1),
            })
    }
}
