//! # Status sink trait.
//!
//! `StatusSink` is the extension point for exporting component state to
//! the outside world (MQTT status publishers, fleet dashboards, plain
//! logs). Each sink is driven by a dedicated worker loop fed by a bounded
//! queue owned by the [`SinkSet`](crate::status::SinkSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching, retries) – they do **not**
//!   block the publisher nor other sinks.
//! - Each sink **declares** its preferred queue capacity via
//!   [`StatusSink::queue_capacity`]. If a queue overflows, events for that
//!   sink are **dropped** (warn).

use async_trait::async_trait;

use crate::state::{Overall, State};

/// One component state transition, as delivered to sinks.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Event sequence number (globally ordered).
    pub seq: u64,
    /// Component name.
    pub component: String,
    /// State before.
    pub from: State,
    /// State after.
    pub to: State,
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// Contract for status sinks.
///
/// Called from a sink-dedicated worker task. Implementations should avoid
/// blocking the async runtime (prefer async I/O and cooperative waits).
#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    /// Handle one component transition.
    async fn on_transition(&self, transition: &Transition);

    /// Handle an aggregate health flip.
    async fn on_overall_change(&self, overall: Overall) {
        let _ = overall;
    }

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this sink's queue.
    ///
    /// On overflow, events for this sink are **dropped** (warn).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
