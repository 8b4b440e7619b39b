//! # Status reporting.
//!
//! Exports component state to the outside world:
//! - [`StatusSink`] - the consumer trait (`on_transition`, `on_overall_change`)
//! - [`Transition`] - the per-transition payload
//! - [`SinkSet`] - non-blocking fan-out with per-sink queues and panic isolation
//! - [`OverallTracker`] - derives aggregate `Healthy`/`Unhealthy`
//! - [`LogSink`] - `tracing`-backed default sink
//!
//! ## Wiring
//! ```text
//! Bus ──► status bridge ──► OverallTracker::update()
//!             │                  └─ flip ──► OverallChanged event + sinks
//!             └──► SinkSet ──► per-sink queue ──► worker ──► StatusSink
//! ```
//!
//! The bridge delivers a transition to sinks only after the machine has
//! updated the component's state cell (machines publish in that order), so
//! a sink never observes a state the table does not already reflect.

mod log;
mod overall;
mod set;
mod sink;

pub use log::LogSink;
pub use overall::OverallTracker;
pub use set::SinkSet;
pub use sink::{StatusSink, Transition};

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{Bus, Event, EventKind};

use set::SinkMsg;

/// Spawns the bridge task translating bus events into sink deliveries.
pub(crate) fn spawn_bridge(
    bus: Bus,
    sinks: Arc<SinkSet>,
    tracker: Arc<OverallTracker>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                ev = rx.recv() => match ev {
                    Ok(ev) => {
                        if ev.kind == EventKind::StateChanged {
                            if let (Some(component), Some(from), Some(to)) =
                                (ev.component.clone(), ev.from, ev.to)
                            {
                                sinks.emit(SinkMsg::Transition(Transition {
                                    seq: ev.seq,
                                    component,
                                    from,
                                    to,
                                    reason: ev.reason.clone(),
                                }));
                            }
                            if let Some(overall) = tracker.update(&ev) {
                                bus.publish(
                                    Event::now(EventKind::OverallChanged).with_overall(overall),
                                );
                                sinks.emit(SinkMsg::Overall(overall));
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    })
}
