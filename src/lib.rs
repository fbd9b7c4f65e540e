//! Rastro - trace-event analysis pipeline
//!
//! Decodes a compact binary stream of typed events, routes each event to
//! the analyzers that subscribed to it, and rebuilds higher-level state
//! from the stream: a full allocation timeline, counter series and stat
//! series decoded from dense per-thread update batches.
//!
//! ```text
//!   trace_file -> replay -> session -> router -> analyzers -> providers
//!                                                     |
//!                             event views (field coercion, varint)
//! ```

pub mod allocations;
pub mod anomaly;
pub mod cli;
pub mod config;
pub mod counters;
pub mod event;
pub mod field;
pub mod provider;
pub mod replay;
pub mod report;
pub mod router;
pub mod series;
pub mod session;
pub mod stats;
pub mod trace_file;
pub mod varint;
