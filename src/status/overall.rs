//! # Overall health tracking with sequence-based ordering.
//!
//! Maintains the authoritative view of every component's state as seen
//! through transition events, using event sequence numbers to handle
//! out-of-order delivery, and derives the aggregate [`Overall`] health:
//! `Healthy` iff every known component is `Running` or `Finished`.
//!
//! ## Rules
//! - Events with `seq <= last_seq` for a component are **rejected** (stale).
//! - [`OverallTracker::update`] returns `Some(new_overall)` only when the
//!   aggregate actually flips, so callers emit exactly one
//!   `OverallChanged` per flip.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::events::{Event, EventKind};
use crate::state::{Overall, State};

/// Per-component record for ordering validation.
struct SeenState {
    last_seq: u64,
    state: State,
}

/// Derives aggregate fleet health from transition events.
pub struct OverallTracker {
    inner: Mutex<Inner>,
}

struct Inner {
    components: HashMap<String, SeenState>,
    overall: Overall,
}

impl OverallTracker {
    /// Creates an empty tracker (vacuously `Healthy`).
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                components: HashMap::new(),
                overall: Overall::Healthy,
            }),
        }
    }

    /// Applies a transition event; returns the new aggregate when it flips.
    pub fn update(&self, ev: &Event) -> Option<Overall> {
        if ev.kind != EventKind::StateChanged {
            return None;
        }
        let (name, to) = match (&ev.component, ev.to) {
            (Some(name), Some(to)) => (name, to),
            _ => return None,
        };

        let mut inner = self.inner.lock().expect("overall lock poisoned");
        {
            let entry = inner.components.entry(name.clone()).or_insert(SeenState {
                last_seq: 0,
                state: State::New,
            });
            if ev.seq <= entry.last_seq && entry.last_seq != 0 {
                return None;
            }
            entry.last_seq = ev.seq;
            entry.state = to;
        }

        let next = if inner
            .components
            .values()
            .all(|c| matches!(c.state, State::Running | State::Finished))
        {
            Overall::Healthy
        } else {
            Overall::Unhealthy
        };
        if next != inner.overall {
            inner.overall = next;
            Some(next)
        } else {
            None
        }
    }

    /// Current aggregate health.
    pub fn overall(&self) -> Overall {
        self.inner.lock().expect("overall lock poisoned").overall
    }
}

impl Default for OverallTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(seq_component: &str, from: State, to: State) -> Event {
        Event::now(EventKind::StateChanged)
            .with_component(seq_component)
            .with_transition(from, to)
    }

    #[test]
    fn flips_unhealthy_while_converging_and_healthy_at_the_end() {
        let tracker = OverallTracker::new();
        assert_eq!(tracker.overall(), Overall::Healthy);

        let flip = tracker.update(&transition("a", State::New, State::Installing));
        assert_eq!(flip, Some(Overall::Unhealthy));

        // Still unhealthy while a is mid-flight; no duplicate flip.
        assert_eq!(tracker.update(&transition("a", State::Installing, State::Starting)), None);

        let flip = tracker.update(&transition("a", State::Starting, State::Running));
        assert_eq!(flip, Some(Overall::Healthy));
    }

    #[test]
    fn errored_components_are_unhealthy() {
        let tracker = OverallTracker::new();
        tracker.update(&transition("a", State::Starting, State::Running));
        let flip = tracker.update(&transition("b", State::Running, State::Errored));
        assert_eq!(flip, Some(Overall::Unhealthy));
    }

    #[test]
    fn stale_events_are_rejected() {
        let tracker = OverallTracker::new();
        let newer = transition("a", State::Starting, State::Running);
        let older = transition("a", State::New, State::Installing);
        assert!(older.seq < newer.seq);

        tracker.update(&newer);
        assert_eq!(tracker.overall(), Overall::Healthy);
        // The stale transition must not resurrect the old state.
        tracker.update(&older);
        assert_eq!(tracker.overall(), Overall::Healthy);
    }
}
