//! # Runtime events emitted by the scheduler and lifecycle machines.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Transition events**: a component's state changed.
//! - **Step events**: a lifecycle step started, was skipped, or failed.
//! - **Scheduler events**: start/stop requests, stuck diagnostics, config changes.
//! - **Shutdown events**: signal received, grace outcome.
//!
//! The [`Event`] struct carries additional metadata such as the component
//! name, step name, the `from`/`to` states of a transition, exit codes, and
//! human-readable reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Machines publish a transition event *after* updating the
//! component's state cell, so a consumer that observes `seq` ordering never
//! sees a dependent advance before its dependency's transition event.
//!
//! ## Example
//! ```rust
//! use edgevisor::{Event, EventKind, State};
//!
//! let ev = Event::now(EventKind::StateChanged)
//!     .with_component("sleeperB")
//!     .with_transition(State::Starting, State::Running);
//!
//! assert_eq!(ev.kind, EventKind::StateChanged);
//! assert_eq!(ev.component.as_deref(), Some("sleeperB"));
//! assert_eq!(ev.to, Some(State::Running));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::state::{Overall, State};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Transition events ===
    /// A component moved from one lifecycle state to another.
    StateChanged,
    /// Aggregate fleet health flipped between Healthy and Unhealthy.
    OverallChanged,

    // === Step events ===
    /// A lifecycle step is about to execute.
    StepStarting,
    /// A step was skipped by its `skipif`/`doif` guard (treated as success).
    StepSkipped,
    /// A step failed (non-zero exit, timeout, spawn failure).
    StepFailed,
    /// A component's periodic timer fired.
    TimerFired,

    // === Scheduler events ===
    /// External request to drive components toward Running.
    StartRequested,
    /// External request to tear components down.
    StopRequested,
    /// A configuration subtree changed.
    ConfigChanged,
    /// No component is changing state while at least one is below target;
    /// the reason names the blocking dependency edge.
    Stuck,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or explicit close).
    ShutdownRequested,
    /// All components reached a quiescent state within the grace period.
    AllStoppedWithin,
    /// Grace period exceeded; some components did not stop in time.
    GraceExceeded,

    // === Sink events ===
    /// A status sink dropped an event (queue full or worker closed).
    SinkOverflow,
    /// A status sink panicked during event processing.
    SinkPanicked,
}

/// Runtime event with optional metadata.
///
/// ## Fields
/// - `seq`: unique sequence number for ordering (monotonically increasing)
/// - `at`: wall-clock timestamp (may go backwards, use for logging only)
/// - `kind`: event classification
/// - `component`, `step`, `from`, `to`, `exit`, `reason`, `overall`: optional metadata
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Name of the component, if applicable.
    pub component: Option<String>,
    /// Lifecycle step name, for step events.
    pub step: Option<String>,
    /// State before a transition.
    pub from: Option<State>,
    /// State after a transition.
    pub to: Option<State>,
    /// Child exit code, for step/run events.
    pub exit: Option<i32>,
    /// Human-readable reason (error text, blocking edge, skip guard).
    pub reason: Option<String>,
    /// New aggregate health, for `OverallChanged`.
    pub overall: Option<Overall>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            component: None,
            step: None,
            from: None,
            to: None,
            exit: None,
            reason: None,
            overall: None,
        }
    }

    /// Attaches a component name.
    pub fn with_component(mut self, name: impl Into<String>) -> Self {
        self.component = Some(name.into());
        self
    }

    /// Attaches a step name.
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Attaches the `from`/`to` states of a transition.
    pub fn with_transition(mut self, from: State, to: State) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Attaches a child exit code.
    pub fn with_exit(mut self, code: Option<i32>) -> Self {
        self.exit = code;
        self
    }

    /// Attaches a human-readable reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the new aggregate health.
    pub fn with_overall(mut self, overall: Overall) -> Self {
        self.overall = Some(overall);
        self
    }

    /// Creates a sink overflow event.
    pub fn sink_overflow(sink: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SinkOverflow).with_reason(format!("sink={sink} reason={reason}"))
    }

    /// Creates a sink panic event.
    pub fn sink_panicked(sink: &'static str, info: String) -> Self {
        Event::now(EventKind::SinkPanicked)
            .with_component(sink)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::now(EventKind::StateChanged);
        let b = Event::now(EventKind::StateChanged);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::StepFailed)
            .with_component("main")
            .with_step("install")
            .with_exit(Some(3))
            .with_reason("boom");
        assert_eq!(ev.component.as_deref(), Some("main"));
        assert_eq!(ev.step.as_deref(), Some("install"));
        assert_eq!(ev.exit, Some(3));
        assert_eq!(ev.reason.as_deref(), Some("boom"));
    }
}
