//! # Lifecycle states for managed components.
//!
//! Every component moves through the states defined here, driven by its
//! [`LifecycleMachine`](crate::core). The forward path is:
//!
//! ```text
//! New → Installing → AwaitingStartup → Starting → Running → Finished
//! ```
//!
//! `Stopping` is entered from any active state on teardown; `Errored` is
//! reachable from any non-terminal state; `Broken` is the sink for
//! components that failed installation (or errored twice without a fresh
//! install) and for components that could not be located at all.
//!
//! ## Readiness ordering
//! Dependency edges carry a *required state*. Whether a dependency is
//! satisfied is decided by [`State::satisfies`], which compares progress
//! ranks along the forward path. `Finished` outranks `Running` so that a
//! one-shot dependency that ran to completion still satisfies dependents
//! that asked for `Running`. `Stopping`, `Errored` and `Broken` never
//! satisfy anything.

use std::fmt;

/// Lifecycle state of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Known to the registry, nothing has run yet.
    New,
    /// The `install` step is executing.
    Installing,
    /// Installed; waiting for dependencies to reach their required states.
    AwaitingStartup,
    /// The `startup` step is executing.
    Starting,
    /// The `run` step (or code-backed handler) is active.
    Running,
    /// Teardown in progress: `shutdown` step and child termination.
    Stopping,
    /// Ran to completion (or is parked between timer fires).
    Finished,
    /// A step failed; recoverable by an external `install` action.
    Errored,
    /// Unrecoverable: failed install retry, double error, or unresolvable.
    Broken,
}

impl State {
    /// Progress rank along the forward path, `None` for states that never
    /// satisfy a dependency edge.
    pub(crate) fn readiness(self) -> Option<u8> {
        match self {
            State::New => Some(0),
            State::Installing => Some(1),
            State::AwaitingStartup => Some(2),
            State::Starting => Some(3),
            State::Running => Some(4),
            State::Finished => Some(5),
            State::Stopping | State::Errored | State::Broken => None,
        }
    }

    /// Whether a dependency in this state meets `required`.
    ///
    /// `Finished` satisfies `Running` (a completed one-shot is as good as a
    /// running service); `Stopping`/`Errored`/`Broken` satisfy nothing.
    pub fn satisfies(self, required: State) -> bool {
        match (self.readiness(), required.readiness()) {
            (Some(have), Some(need)) => have >= need,
            _ => false,
        }
    }

    /// Terminal or quiescent states: nothing will change without an
    /// external action.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Finished | State::Errored | State::Broken)
    }

    /// States in which a component holds no resources and blocks no
    /// reverse-dependency during shutdown.
    pub fn is_quiescent(self) -> bool {
        matches!(
            self,
            State::New | State::Finished | State::Errored | State::Broken
        )
    }

    /// All states, in declaration order. Used for friendly prefix matching
    /// of dependency declarations.
    pub fn all() -> &'static [State] {
        &[
            State::New,
            State::Installing,
            State::AwaitingStartup,
            State::Starting,
            State::Running,
            State::Stopping,
            State::Finished,
            State::Errored,
            State::Broken,
        ]
    }

    /// Stable name used in logs, events, and dependency declarations.
    pub fn name(self) -> &'static str {
        match self {
            State::New => "New",
            State::Installing => "Installing",
            State::AwaitingStartup => "AwaitingStartup",
            State::Starting => "Starting",
            State::Running => "Running",
            State::Stopping => "Stopping",
            State::Finished => "Finished",
            State::Errored => "Errored",
            State::Broken => "Broken",
        }
    }

    /// Case-insensitive prefix match against state names, first match in
    /// declaration order wins (`run` → `Running`, `f` → `Finished`).
    ///
    /// Returns `None` for an empty fragment or no match.
    pub fn match_prefix(fragment: &str) -> Option<State> {
        if fragment.is_empty() {
            return None;
        }
        State::all().iter().copied().find(|s| {
            s.name().len() >= fragment.len()
                && s.name()[..fragment.len()].eq_ignore_ascii_case(fragment)
        })
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Aggregate fleet health, reported through the status sinks.
///
/// `Healthy` iff every known component is `Running` or `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overall {
    Healthy,
    Unhealthy,
}

impl fmt::Display for Overall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Overall::Healthy => "Healthy",
            Overall::Unhealthy => "Unhealthy",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_satisfies_running() {
        assert!(State::Finished.satisfies(State::Running));
        assert!(State::Running.satisfies(State::Running));
        assert!(!State::Starting.satisfies(State::Running));
    }

    #[test]
    fn error_states_satisfy_nothing() {
        for s in [State::Stopping, State::Errored, State::Broken] {
            assert!(!s.satisfies(State::New));
            assert!(!s.satisfies(State::Running));
        }
    }

    #[test]
    fn prefix_matching_is_friendly() {
        assert_eq!(State::match_prefix("run"), Some(State::Running));
        assert_eq!(State::match_prefix("RUNNING"), Some(State::Running));
        assert_eq!(State::match_prefix("f"), Some(State::Finished));
        assert_eq!(State::match_prefix("i"), Some(State::Installing));
        // Declaration order breaks the tie between Starting and Stopping.
        assert_eq!(State::match_prefix("st"), Some(State::Starting));
        assert_eq!(State::match_prefix("sto"), Some(State::Stopping));
        assert_eq!(State::match_prefix(""), None);
        assert_eq!(State::match_prefix("xyzzy"), None);
    }
}
