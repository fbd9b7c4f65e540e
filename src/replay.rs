//! Trace replay: a reader thread feeding the analysis thread
//!
//! ```text
//!   [reader thread] --TraceRecord--> bounded channel --> [analysis thread]
//!    parse framing                                        declare / dispatch
//! ```
//!
//! The channel is bounded so a fast reader cannot run arbitrarily far ahead
//! of analysis. Records are consumed in the order they were read, so
//! routing order is file order. A read error ends the stream early; the
//! session is still closed and summarized.

use std::io::Read;
use std::path::Path;
use std::thread;

use crossbeam::channel;
use serde::Serialize;
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::router::{Analyzer, RouteError};
use crate::session::{AnalysisSession, AnalysisSummary};
use crate::trace_file::{TraceFileError, TraceReader, TraceRecord};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Trace(#[from] TraceFileError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("trace reader thread panicked")]
    ReaderPanicked,
}

/// Record counts seen by the analysis thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub records: u64,
    pub types: u64,
    pub events: u64,
}

/// Finished replay: the closed session plus how reading went
pub struct ReplayOutcome {
    pub session: AnalysisSession,
    pub summary: AnalysisSummary,
    pub stats: ReplayStats,
    /// Framing error that cut the stream short, if any
    pub read_error: Option<TraceFileError>,
}

/// Replay configuration
pub struct Replay {
    config: AnalysisConfig,
    capacity: usize,
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl Replay {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            capacity: DEFAULT_CHANNEL_CAPACITY,
            analyzers: Vec::new(),
        }
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Route events to an extra analyzer alongside the built-in ones
    pub fn analyzer(mut self, analyzer: Box<dyn Analyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn run_file<P: AsRef<Path>>(self, path: P) -> Result<ReplayOutcome, ReplayError> {
        let reader = TraceReader::open(path)?;
        self.run(reader)
    }

    pub fn run<R>(self, reader: TraceReader<R>) -> Result<ReplayOutcome, ReplayError>
    where
        R: Read + Send + 'static,
    {
        let mut session = AnalysisSession::new(reader.context(), &self.config)?;
        for analyzer in self.analyzers {
            session.add_analyzer(analyzer)?;
        }
        session.begin()?;

        let (tx, rx) = channel::bounded(self.capacity);
        let producer = thread::spawn(move || {
            for record in reader {
                let failed = record.is_err();
                // Receiver gone: analysis stopped, nothing left to do
                if tx.send(record).is_err() || failed {
                    break;
                }
            }
        });

        let mut stats = ReplayStats::default();
        let mut read_error = None;
        for record in rx {
            match record {
                Ok(TraceRecord::NewEvent(descriptor)) => {
                    stats.records += 1;
                    stats.types += 1;
                    session.declare_type(descriptor)?;
                }
                Ok(TraceRecord::Event(event)) => {
                    stats.records += 1;
                    stats.events += 1;
                    session.dispatch(&event)?;
                }
                Err(err) => {
                    tracing::error!(error = %err, records = stats.records, "trace read failed; ending early");
                    read_error = Some(err);
                    break;
                }
            }
        }
        producer.join().map_err(|_| ReplayError::ReaderPanicked)?;

        let summary = session.end()?;
        tracing::info!(
            records = stats.records,
            events = stats.events,
            diagnostics = summary.diagnostics.len(),
            "replay finished"
        );
        Ok(ReplayOutcome {
            session,
            summary,
            stats,
            read_error,
        })
    }
}
