//! One analysis run over one trace
//!
//! [`AnalysisSession`] owns the router and the built-in providers. It
//! publishes the providers in a [`ProviderRegistry`] so readers on other
//! threads can query them while events are still flowing, and it turns
//! everything that goes wrong along the way (unknown type uids, conflicting
//! declarations, analyzer errors) into diagnostics instead of aborting.

use std::sync::Arc;

use fnv::FnvHashMap;
use serde::Serialize;

use crate::allocations::{AllocationSummary, AllocationsAnalyzer, AllocationsProvider};
use crate::anomaly::{Anomaly, AnomalyLog};
use crate::config::AnalysisConfig;
use crate::counters::{CountersAnalyzer, CountersProvider, CountersSummary};
use crate::event::{EventTypeDescriptor, RawEvent};
use crate::provider::{keys, Provider, ProviderRegistry, SharedProvider};
use crate::router::{Analyzer, EventRouter, RouteError, RouterState};
use crate::stats::{StatsAnalyzer, StatsProvider, StatsSummary};

/// Time base and format version announced by the trace header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    pub start_cycle: u64,
    /// Cycles per second; zero means the producer sent no time base
    pub cycle_frequency: u64,
    pub version: u16,
}

impl SessionContext {
    pub fn new(start_cycle: u64, cycle_frequency: u64, version: u16) -> Self {
        Self {
            start_cycle,
            cycle_frequency,
            version,
        }
    }

    /// Seconds since the session start; negative for earlier cycles
    ///
    /// # Example
    /// ```
    /// use rastro::session::SessionContext;
    ///
    /// let ctx = SessionContext::new(1_000, 500, 1);
    /// assert_eq!(ctx.cycle_to_seconds(2_000), 2.0);
    /// assert_eq!(ctx.cycle_to_seconds(500), -1.0);
    /// ```
    pub fn cycle_to_seconds(&self, cycle: u64) -> f64 {
        if self.cycle_frequency == 0 {
            return 0.0;
        }
        let delta = i128::from(cycle) - i128::from(self.start_cycle);
        delta as f64 / self.cycle_frequency as f64
    }

    pub fn seconds_to_cycle(&self, seconds: f64) -> u64 {
        let cycles = seconds * self.cycle_frequency as f64;
        if cycles <= 0.0 {
            self.start_cycle.saturating_sub((-cycles) as u64)
        } else {
            self.start_cycle.saturating_add(cycles as u64)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    UnknownEventType,
    ConflictingEventType,
    AnalyzerError,
    AnalyzerUnsubscribed,
}

/// Something the session tolerated; `count` folds repeats together
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub count: u64,
}

/// Anomaly totals across every provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnomalyCounts {
    pub total: u64,
    pub dropped: u64,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl AnomalyCounts {
    fn add(&mut self, log: &AnomalyLog) {
        let (low, medium, high) = log.severity_counts();
        self.total += log.total();
        self.dropped += log.dropped();
        self.low += low;
        self.medium += medium;
        self.high += high;
    }
}

/// Everything a report needs, taken under read scopes
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub context: SessionContext,
    pub state: RouterState,
    pub events: u64,
    /// Time the point-in-time figures refer to
    pub time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocations: Option<AllocationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters: Option<CountersSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsSummary>,
    pub anomaly_counts: AnomalyCounts,
    pub anomalies: Vec<Anomaly>,
    pub diagnostics: Vec<Diagnostic>,
    pub active_analyzers: Vec<String>,
}

/// Router plus built-in providers for one trace
pub struct AnalysisSession {
    context: SessionContext,
    router: EventRouter,
    registry: ProviderRegistry,
    allocations: Option<SharedProvider<AllocationsProvider>>,
    counters: Option<SharedProvider<CountersProvider>>,
    stats: Option<SharedProvider<StatsProvider>>,
    events: u64,
    diagnostics: Vec<Diagnostic>,
    unknown_types: FnvHashMap<u16, usize>,
}

impl AnalysisSession {
    /// Install the analyzers `config` enables and publish their providers
    pub fn new(context: SessionContext, config: &AnalysisConfig) -> Result<Self, RouteError> {
        let mut session = Self {
            context,
            router: EventRouter::new(),
            registry: ProviderRegistry::default(),
            allocations: None,
            counters: None,
            stats: None,
            events: 0,
            diagnostics: Vec::new(),
            unknown_types: FnvHashMap::default(),
        };

        if config.analyzers.allocations {
            let provider = Provider::shared(AllocationsProvider::with_config(context, config));
            session.registry.register(keys::ALLOCATIONS, Arc::clone(&provider));
            session.add_analyzer(Box::new(AllocationsAnalyzer::new(Arc::clone(&provider))))?;
            session.allocations = Some(provider);
        }
        if config.analyzers.counters {
            let provider = Provider::shared(CountersProvider::with_config(config));
            session.registry.register(keys::COUNTERS, Arc::clone(&provider));
            session.add_analyzer(Box::new(CountersAnalyzer::new(Arc::clone(&provider))))?;
            session.counters = Some(provider);
        }
        if config.analyzers.stats {
            let provider = Provider::shared(StatsProvider::with_config(context, config));
            session.registry.register(keys::STATS, Arc::clone(&provider));
            session.add_analyzer(Box::new(StatsAnalyzer::new(Arc::clone(&provider))))?;
            session.stats = Some(provider);
        }
        Ok(session)
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn state(&self) -> RouterState {
        self.router.state()
    }

    /// Add a custom analyzer next to the built-in ones
    pub fn add_analyzer(&mut self, analyzer: Box<dyn Analyzer>) -> Result<(), RouteError> {
        self.router.add_analyzer(analyzer)
    }

    pub fn begin(&mut self) -> Result<(), RouteError> {
        self.router.begin(&self.context)
    }

    /// Declare an event type; a conflicting redeclaration keeps the first
    pub fn declare_type(&mut self, descriptor: EventTypeDescriptor) -> Result<(), RouteError> {
        match self.router.declare_type(descriptor) {
            Err(RouteError::ConflictingType {
                uid,
                existing,
                incoming,
            }) => {
                tracing::warn!(uid, %existing, %incoming, "conflicting event type ignored");
                self.diagnostics.push(Diagnostic {
                    kind: DiagnosticKind::ConflictingEventType,
                    message: format!("uid {uid} declared as {existing}, then as {incoming}"),
                    count: 1,
                });
                Ok(())
            }
            other => other,
        }
    }

    /// Route one event; undeclared uids are counted, not fatal
    pub fn dispatch(&mut self, event: &RawEvent) -> Result<usize, RouteError> {
        self.events += 1;
        match self.router.dispatch(&self.context, event) {
            Err(RouteError::UnknownType(uid)) => {
                self.note_unknown_type(uid);
                Ok(0)
            }
            other => other,
        }
    }

    /// Finish routing and summarize the final state
    pub fn end(&mut self) -> Result<AnalysisSummary, RouteError> {
        self.router.end()?;
        Ok(self.summary(None))
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn allocations(&self) -> Option<&SharedProvider<AllocationsProvider>> {
        self.allocations.as_ref()
    }

    pub fn counters(&self) -> Option<&SharedProvider<CountersProvider>> {
        self.counters.as_ref()
    }

    pub fn stats(&self) -> Option<&SharedProvider<StatsProvider>> {
        self.stats.as_ref()
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    /// Session diagnostics followed by analyzer failures
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = self.diagnostics.clone();
        diagnostics.extend(self.router.failures().iter().map(|failure| Diagnostic {
            kind: if failure.unsubscribed {
                DiagnosticKind::AnalyzerUnsubscribed
            } else {
                DiagnosticKind::AnalyzerError
            },
            message: format!("{} on {}: {}", failure.analyzer, failure.event, failure.error),
            count: 1,
        }));
        diagnostics
    }

    /// Summarize at `at` seconds, or at the latest event time
    pub fn summary(&self, at: Option<f64>) -> AnalysisSummary {
        let mut anomaly_counts = AnomalyCounts::default();
        let mut anomalies = Vec::new();

        let allocations = self.allocations.as_ref().map(|provider| {
            let timeline = provider.read();
            anomaly_counts.add(timeline.anomalies());
            anomalies.extend_from_slice(timeline.anomalies().entries());
            timeline.summary_at(at.unwrap_or_else(|| timeline.current_time()))
        });
        let counters = self.counters.as_ref().map(|provider| {
            let counters = provider.read();
            anomaly_counts.add(counters.anomalies());
            anomalies.extend_from_slice(counters.anomalies().entries());
            counters.summary(at)
        });
        let stats = self.stats.as_ref().map(|provider| {
            let stats = provider.read();
            anomaly_counts.add(stats.anomalies());
            anomalies.extend_from_slice(stats.anomalies().entries());
            stats.summary(at)
        });

        let time = allocations
            .as_ref()
            .map_or_else(|| at.unwrap_or(0.0), |summary| summary.time);
        anomalies.sort_by(|a, b| a.time.total_cmp(&b.time));

        AnalysisSummary {
            context: self.context,
            state: self.router.state(),
            events: self.events,
            time,
            allocations,
            counters,
            stats,
            anomaly_counts,
            anomalies,
            diagnostics: self.diagnostics(),
            active_analyzers: self
                .router
                .active_analyzers()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    fn note_unknown_type(&mut self, uid: u16) {
        if let Some(&index) = self.unknown_types.get(&uid) {
            self.diagnostics[index].count += 1;
            return;
        }
        tracing::warn!(uid, "event for undeclared type uid; skipping");
        self.unknown_types.insert(uid, self.diagnostics.len());
        self.diagnostics.push(Diagnostic {
            kind: DiagnosticKind::UnknownEventType,
            message: format!("events with undeclared type uid {uid}"),
            count: 1,
        });
    }
}
