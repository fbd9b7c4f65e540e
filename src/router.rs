//! Event routing from a decoded stream to subscribed analyzers
//!
//! Analyzers declare interest once, when analysis begins, by subscribing a
//! small route id to a `(logger, event)` pair or to every event. From then
//! on the subscription table is frozen. Each incoming event is resolved by
//! its type uid (once per uid, then cached) to the list of analyzers that
//! want it, and each of them gets the route id back so it can switch on an
//! integer instead of comparing names.
//!
//! ```text
//!   Uninitialized --begin()--> Routing --end()--> Terminated
//! ```
//!
//! A router is single use. An analyzer that reports a fatal error is
//! dropped from dispatch for the rest of the session; everyone else keeps
//! receiving events in stream order.

use fnv::FnvHashMap;
use serde::Serialize;
use thiserror::Error;

use crate::event::{EventTypeDescriptor, EventView, RawEvent};
use crate::session::SessionContext;
use crate::varint::DecodeError;

/// Analyzer-chosen tag echoed back on every routed event
pub type RouteId = u16;

/// Failures an analyzer can report from [`Analyzer::on_event`]
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// The event payload was malformed; only this event is lost
    #[error("corrupt event payload: {0}")]
    Corrupt(#[from] DecodeError),

    /// The analyzer cannot continue and should stop receiving events
    #[error("{0}")]
    Fatal(String),
}

impl AnalyzerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Router misuse and unresolvable events
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("router is {actual:?}, operation requires {expected:?}")]
    InvalidState {
        actual: RouterState,
        expected: RouterState,
    },

    #[error("no event type declared for uid {0}")]
    UnknownType(u16),

    #[error("event uid {uid} already declared as {existing}, refusing {incoming}")]
    ConflictingType {
        uid: u16,
        existing: String,
        incoming: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouterState {
    Uninitialized,
    Routing,
    Terminated,
}

/// Everything an analyzer sees for one routed event
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    pub session: &'a SessionContext,
    pub event: EventView<'a>,
}

/// A consumer of routed events
pub trait Analyzer: Send {
    /// Short name used in logs and diagnostics
    fn name(&self) -> &str;

    /// Register subscriptions; called exactly once, before any event
    fn on_analysis_begin(&mut self, routes: &mut RouteBuilder<'_>);

    /// Handle one event delivered for `route_id`
    ///
    /// Returning [`AnalyzerError::Fatal`] unsubscribes this analyzer.
    fn on_event(&mut self, route_id: RouteId, ctx: &EventContext<'_>)
        -> Result<(), AnalyzerError>;

    /// Called once when the stream ends
    fn on_analysis_end(&mut self) {}
}

#[derive(Debug, Clone)]
enum Target {
    Event { logger: String, event: String },
    All,
}

#[derive(Debug, Clone)]
struct Subscription {
    analyzer: usize,
    route_id: RouteId,
    target: Target,
}

impl Subscription {
    fn matches(&self, descriptor: &EventTypeDescriptor) -> bool {
        match &self.target {
            Target::All => true,
            Target::Event { logger, event } => {
                *logger == descriptor.logger && *event == descriptor.name
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RouteTarget {
    analyzer: usize,
    route_id: RouteId,
}

/// Subscription handle passed to [`Analyzer::on_analysis_begin`]
pub struct RouteBuilder<'a> {
    analyzer: usize,
    session: &'a SessionContext,
    subscriptions: &'a mut Vec<Subscription>,
}

impl RouteBuilder<'_> {
    pub fn session(&self) -> &SessionContext {
        self.session
    }

    /// Route `logger.event` to this analyzer under `route_id`
    pub fn subscribe(&mut self, route_id: RouteId, logger: &str, event: &str) {
        self.subscriptions.push(Subscription {
            analyzer: self.analyzer,
            route_id,
            target: Target::Event {
                logger: logger.to_string(),
                event: event.to_string(),
            },
        });
    }

    /// Route every event to this analyzer under `route_id`
    pub fn subscribe_all(&mut self, route_id: RouteId) {
        self.subscriptions.push(Subscription {
            analyzer: self.analyzer,
            route_id,
            target: Target::All,
        });
    }
}

struct AnalyzerSlot {
    analyzer: Box<dyn Analyzer>,
    active: bool,
}

/// Record of an analyzer error raised during dispatch
#[derive(Debug, Clone, Serialize)]
pub struct RouteFailure {
    pub analyzer: String,
    pub event: String,
    pub error: String,
    pub unsubscribed: bool,
}

/// Dispatches events to analyzers by subscription
pub struct EventRouter {
    state: RouterState,
    analyzers: Vec<AnalyzerSlot>,
    subscriptions: Vec<Subscription>,
    types: FnvHashMap<u16, EventTypeDescriptor>,
    routes: FnvHashMap<u16, Vec<RouteTarget>>,
    failures: Vec<RouteFailure>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            state: RouterState::Uninitialized,
            analyzers: Vec::new(),
            subscriptions: Vec::new(),
            types: FnvHashMap::default(),
            routes: FnvHashMap::default(),
            failures: Vec::new(),
        }
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    /// Add an analyzer; only allowed before [`EventRouter::begin`]
    pub fn add_analyzer(&mut self, analyzer: Box<dyn Analyzer>) -> Result<(), RouteError> {
        self.expect_state(RouterState::Uninitialized)?;
        self.analyzers.push(AnalyzerSlot {
            analyzer,
            active: true,
        });
        Ok(())
    }

    /// Collect every analyzer's subscriptions and start routing
    pub fn begin(&mut self, session: &SessionContext) -> Result<(), RouteError> {
        self.expect_state(RouterState::Uninitialized)?;
        for (index, slot) in self.analyzers.iter_mut().enumerate() {
            let mut routes = RouteBuilder {
                analyzer: index,
                session,
                subscriptions: &mut self.subscriptions,
            };
            slot.analyzer.on_analysis_begin(&mut routes);
        }
        tracing::debug!(
            analyzers = self.analyzers.len(),
            subscriptions = self.subscriptions.len(),
            "analysis begin"
        );
        self.state = RouterState::Routing;
        Ok(())
    }

    /// Declare an event type; re-declaring an identical layout is a no-op
    pub fn declare_type(&mut self, descriptor: EventTypeDescriptor) -> Result<(), RouteError> {
        if self.state == RouterState::Terminated {
            return Err(RouteError::InvalidState {
                actual: self.state,
                expected: RouterState::Routing,
            });
        }
        if let Some(existing) = self.types.get(&descriptor.uid) {
            if *existing == descriptor {
                return Ok(());
            }
            return Err(RouteError::ConflictingType {
                uid: descriptor.uid,
                existing: existing.qualified_name(),
                incoming: descriptor.qualified_name(),
            });
        }
        tracing::trace!(uid = descriptor.uid, name = %descriptor.qualified_name(), "event type declared");
        self.types.insert(descriptor.uid, descriptor);
        Ok(())
    }

    pub fn descriptor(&self, uid: u16) -> Option<&EventTypeDescriptor> {
        self.types.get(&uid)
    }

    /// Route one event; returns the number of analyzer invocations
    pub fn dispatch(
        &mut self,
        session: &SessionContext,
        event: &RawEvent,
    ) -> Result<usize, RouteError> {
        self.expect_state(RouterState::Routing)?;
        let descriptor = self
            .types
            .get(&event.uid)
            .ok_or(RouteError::UnknownType(event.uid))?;

        let targets = self.routes.entry(event.uid).or_insert_with(|| {
            self.subscriptions
                .iter()
                .filter(|sub| sub.matches(descriptor))
                .map(|sub| RouteTarget {
                    analyzer: sub.analyzer,
                    route_id: sub.route_id,
                })
                .collect()
        });

        let ctx = EventContext {
            session,
            event: event.view(descriptor),
        };
        let mut delivered = 0;
        for target in targets.iter() {
            let slot = &mut self.analyzers[target.analyzer];
            if !slot.active {
                continue;
            }
            delivered += 1;
            if let Err(err) = slot.analyzer.on_event(target.route_id, &ctx) {
                let unsubscribed = err.is_fatal();
                if unsubscribed {
                    slot.active = false;
                    tracing::warn!(
                        analyzer = slot.analyzer.name(),
                        event = %descriptor.qualified_name(),
                        error = %err,
                        "analyzer failed; unsubscribing"
                    );
                } else {
                    tracing::error!(
                        analyzer = slot.analyzer.name(),
                        event = %descriptor.qualified_name(),
                        error = %err,
                        "analyzer rejected event"
                    );
                }
                self.failures.push(RouteFailure {
                    analyzer: slot.analyzer.name().to_string(),
                    event: descriptor.qualified_name(),
                    error: err.to_string(),
                    unsubscribed,
                });
            }
        }
        Ok(delivered)
    }

    /// Finish the session; every analyzer gets `on_analysis_end`
    pub fn end(&mut self) -> Result<(), RouteError> {
        self.expect_state(RouterState::Routing)?;
        for slot in &mut self.analyzers {
            slot.analyzer.on_analysis_end();
        }
        self.state = RouterState::Terminated;
        tracing::debug!(failures = self.failures.len(), "analysis end");
        Ok(())
    }

    pub fn failures(&self) -> &[RouteFailure] {
        &self.failures
    }

    /// Names of analyzers still receiving events
    pub fn active_analyzers(&self) -> Vec<&str> {
        self.analyzers
            .iter()
            .filter(|slot| slot.active)
            .map(|slot| slot.analyzer.name())
            .collect()
    }

    fn expect_state(&self, expected: RouterState) -> Result<(), RouteError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RouteError::InvalidState {
                actual: self.state,
                expected,
            })
        }
    }
}
