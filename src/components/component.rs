//! # Component: one managed unit of work.
//!
//! A [`Component`] bundles everything the runtime knows about a managed
//! unit: its name, its configuration subtree (`services.<name>`), the kind
//! of execution backing it, the current lifecycle state, the sticky error
//! flag, and the resolved dependency list.
//!
//! ## Rules
//! - Components are created lazily by the registry on first lookup and
//!   never destroyed mid-run.
//! - The state cell is written only by the component's lifecycle machine
//!   (single-writer discipline); everyone else reads.
//! - The computed dependency list is an `Arc` snapshot swapped on
//!   (re)resolution, so the scheduler iterates it lock-free.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::graph::DepEdge;
use crate::state::State;
use crate::store::Topics;

use super::handler::Handler;

/// What drives a component's lifecycle steps.
#[derive(Clone)]
pub enum Kind {
    /// Shell scripts from the recipe's lifecycle block.
    Generic,
    /// An in-process [`Handler`] registered under the recipe's `class`.
    CodeBacked(Arc<dyn Handler>),
}

/// Lock-free cell holding a [`State`].
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> State {
        // Discriminants match State::all() declaration order.
        State::all()[self.0.load(Ordering::Acquire) as usize]
    }

    fn store(&self, state: State) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Shared handle to a component.
pub type ComponentRef = Arc<Component>;

/// One managed unit of work with a lifecycle.
pub struct Component {
    name: String,
    config: Topics,
    kind: Kind,
    state: StateCell,
    errored: AtomicBool,
    errors_since_install: AtomicU32,
    defective: AtomicBool,
    status: Mutex<Option<String>>,
    explicit_deps: RwLock<Vec<(String, State)>>,
    computed_deps: RwLock<Arc<Vec<DepEdge>>>,
}

impl Component {
    /// Creates a component in the given initial state.
    pub(crate) fn new(name: impl Into<String>, config: Topics, kind: Kind, state: State) -> Self {
        Self {
            name: name.into(),
            config,
            kind,
            state: StateCell::new(state),
            errored: AtomicBool::new(false),
            errors_since_install: AtomicU32::new(0),
            defective: AtomicBool::new(false),
            status: Mutex::new(None),
            explicit_deps: RwLock::new(Vec::new()),
            computed_deps: RwLock::new(Arc::default()),
        }
    }

    /// Globally unique component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The component's configuration subtree (`services.<name>`).
    pub fn config(&self) -> &Topics {
        &self.config
    }

    /// The `lifecycle` subtree, if declared.
    pub fn lifecycle(&self) -> Option<Topics> {
        self.config
            .get_child("lifecycle")
            .and_then(|n| n.as_branch().cloned())
    }

    /// Execution backing.
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state.load()
    }

    pub(crate) fn set_state(&self, state: State) {
        self.state.store(state);
    }

    /// Sticky error flag; cleared only by a fresh install.
    pub fn errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// Marks the sticky flag and counts the error toward the
    /// double-error → `Broken` rule. Returns the new count.
    pub(crate) fn mark_errored(&self) -> u32 {
        self.errored.store(true, Ordering::Release);
        self.errors_since_install.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// A fresh install clears the sticky flag and the error count.
    pub(crate) fn clear_errors(&self) {
        self.errored.store(false, Ordering::Release);
        self.errors_since_install.store(0, Ordering::Release);
    }

    /// Permanently defective (bad dependency syntax, bad timer block);
    /// never accepts an install action.
    pub fn defective(&self) -> bool {
        self.defective.load(Ordering::Acquire)
    }

    pub(crate) fn mark_defective(&self) {
        self.defective.store(true, Ordering::Release);
    }

    /// Last non-empty human-readable status line.
    pub fn status_message(&self) -> Option<String> {
        self.status.lock().expect("status lock poisoned").clone()
    }

    pub(crate) fn set_status(&self, message: Option<String>) {
        let mut slot = self.status.lock().expect("status lock poisoned");
        match message {
            Some(m) if !m.is_empty() => *slot = Some(m),
            Some(_) => {}
            None => *slot = None,
        }
    }

    /// Declared `(name, required_state)` pairs, in recipe order.
    pub fn explicit_deps(&self) -> Vec<(String, State)> {
        self.explicit_deps.read().expect("deps lock poisoned").clone()
    }

    pub(crate) fn set_explicit_deps(&self, deps: Vec<(String, State)>) {
        *self.explicit_deps.write().expect("deps lock poisoned") = deps;
    }

    /// Resolved dependency edges (shared snapshot from the graph).
    pub fn computed_deps(&self) -> Arc<Vec<DepEdge>> {
        self.computed_deps.read().expect("deps lock poisoned").clone()
    }

    pub(crate) fn set_computed_deps(&self, deps: Arc<Vec<DepEdge>>) {
        *self.computed_deps.write().expect("deps lock poisoned") = deps;
    }

    /// `setenv` entries for lifecycle step children, in recipe order.
    pub fn setenv(&self) -> Vec<(String, String)> {
        self.config
            .get_child("setenv")
            .and_then(|n| n.as_branch().cloned())
            .map(|t| t.leaf_pairs())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConfigStore;

    fn component(name: &str) -> Component {
        let store = ConfigStore::new();
        let cfg = store.lookup_topics(&format!("services.{name}"));
        Component::new(name, cfg, Kind::Generic, State::New)
    }

    #[test]
    fn state_cell_round_trips_every_state() {
        let c = component("cell");
        for &s in State::all() {
            c.set_state(s);
            assert_eq!(c.state(), s);
        }
    }

    #[test]
    fn error_count_resets_on_install() {
        let c = component("err");
        assert_eq!(c.mark_errored(), 1);
        assert_eq!(c.mark_errored(), 2);
        assert!(c.errored());
        c.clear_errors();
        assert!(!c.errored());
        assert_eq!(c.mark_errored(), 1);
    }

    #[test]
    fn empty_status_lines_are_ignored() {
        let c = component("status");
        c.set_status(Some("installing v2".to_string()));
        c.set_status(Some(String::new()));
        assert_eq!(c.status_message().as_deref(), Some("installing v2"));
        c.set_status(None);
        assert_eq!(c.status_message(), None);
    }

    #[test]
    fn setenv_reads_config_subtree() {
        let store = ConfigStore::new();
        let cfg = store.lookup_topics("services.envy");
        let env = cfg.subtopics("setenv");
        env.set("A", "1");
        env.set("B", "2");
        let c = Component::new("envy", cfg, Kind::Generic, State::New);
        assert_eq!(
            c.setenv(),
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]
        );
    }
}
