//! # Component registry: locate, instantiate, cache.
//!
//! [`ComponentRegistry::locate`] is the single entry point for turning a
//! name into a live component. It is idempotent and thread-safe: repeated
//! lookups return the same instance, and two components never share a name.
//!
//! ## Locate flow
//! ```text
//! locate(name)
//!   ├─ cache hit ──► existing ComponentRef
//!   └─ miss:
//!       ├─ config at services.<name>?   (importing from the RecipeSource
//!       │                               on a miss, newest matching version)
//!       │    └─ absent/empty ──► error-component (Broken,
//!       │                         "no matching definition")
//!       ├─ class = <symbol> ──► code-backed handler from the factory
//!       │                       registry (instantiation failure ──►
//!       │                       error-component)
//!       ├─ implementors map names a symbol ──► code-backed handler
//!       ├─ otherwise ──► Generic (script-driven)
//!       ├─ spawn LifecycleMachine, publish the initial Broken transition
//!       │   for error-components
//!       └─ resolve declared dependencies: parse, add graph edges,
//!          locate each dependency recursively
//! ```
//!
//! ## Rules
//! - The cache entry is inserted **before** dependencies resolve, so
//!   declaration cycles terminate (and are later rejected at topo sort).
//! - Every instantiation failure is logged as `component-locate-failed`
//!   and yields an error-component that poisons its direct dependents.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use semver::VersionReq;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::components::{parse_dependencies, Component, ComponentRef, HandlerRegistry, Kind};
use crate::config::Config;
use crate::events::{Bus, Event, EventKind};
use crate::graph::DependencyGraph;
use crate::recipes::RecipeSource;
use crate::state::State;
use crate::store::{ConfigStore, Node, Topics};

use super::machine::{LifecycleMachine, Mail, StateTable};
use super::steps::StepContext;

/// Config keys accepted for the dependency declaration, tried in order.
const DEPENDENCY_KEYS: [&str; 3] = ["dependencies", "dependency", "requires"];

/// A cached component with its machine plumbing.
pub(crate) struct ComponentHandle {
    pub component: ComponentRef,
    pub mail: mpsc::Sender<Mail>,
    cancel: CancellationToken,
    join: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Thread-safe component cache and instantiation point.
pub struct ComponentRegistry {
    store: ConfigStore,
    bus: Bus,
    cfg: Config,
    steps: StepContext,
    handlers: Arc<HandlerRegistry>,
    recipes: Option<Arc<dyn RecipeSource>>,
    graph: Arc<DependencyGraph>,
    states: Arc<StateTable>,
    cache: DashMap<String, Arc<ComponentHandle>>,
}

impl ComponentRegistry {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: ConfigStore,
        bus: Bus,
        cfg: Config,
        steps: StepContext,
        handlers: Arc<HandlerRegistry>,
        recipes: Option<Arc<dyn RecipeSource>>,
        graph: Arc<DependencyGraph>,
        states: Arc<StateTable>,
    ) -> Self {
        Self {
            store,
            bus,
            cfg,
            steps,
            handlers,
            recipes,
            graph,
            states,
            cache: DashMap::new(),
        }
    }

    /// The configuration store backing this registry.
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// The shared dependency graph.
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Current state of `name`, if it has been located.
    pub fn state_of(&self, name: &str) -> Option<State> {
        self.states.get(name).map(|s| *s)
    }

    /// Names of all located components, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Locates `name`, instantiating on first lookup.
    ///
    /// Never fails: a component that cannot be built becomes an
    /// error-component in `Broken`.
    pub fn locate<'a>(
        &'a self,
        name: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ComponentRef> + Send + 'a>> {
        Box::pin(async move {
            if let Some(handle) = self.cache.get(name) {
                return handle.component.clone();
            }

            let (component, broken_reason) = self.build(name).await;

            let (handle, winner) = match self.cache.entry(name.to_string()) {
                Entry::Occupied(existing) => (existing.get().clone(), false),
                Entry::Vacant(slot) => {
                    let cancel = CancellationToken::new();
                    let (mail, join) = LifecycleMachine::spawn(
                        component.clone(),
                        self.bus.clone(),
                        self.steps.clone(),
                        self.graph.clone(),
                        self.states.clone(),
                        self.cfg.grace,
                        cancel.clone(),
                    );
                    self.states.insert(name.to_string(), component.state());
                    let handle = Arc::new(ComponentHandle {
                        component,
                        mail,
                        cancel,
                        join: std::sync::Mutex::new(Some(join)),
                    });
                    slot.insert(handle.clone());
                    (handle, true)
                }
            };

            if winner {
                if let Some(reason) = broken_reason {
                    // The machine never ran for this stub; publish its one
                    // transition here, after the state table is in place.
                    self.bus.publish(
                        Event::now(EventKind::StateChanged)
                            .with_component(name)
                            .with_transition(State::New, State::Broken)
                            .with_reason(reason),
                    );
                } else {
                    self.resolve_deps(&handle.component).await;
                }
            }
            handle.component.clone()
        })
    }

    /// Posts a mail to the machine of `name`, if located.
    pub(crate) async fn send(&self, name: &str, mail: Mail) {
        let tx = self.cache.get(name).map(|h| h.mail.clone());
        if let Some(tx) = tx {
            let _ = tx.send(mail).await;
        }
    }

    /// Cancels every machine and waits for them to wind down.
    ///
    /// Returns the names of components whose machines did not finish
    /// within the configured grace.
    pub(crate) async fn close_all(&self) -> Vec<String> {
        let handles: Vec<(String, Arc<ComponentHandle>)> = self
            .cache
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (_, h) in &handles {
            h.cancel.cancel();
        }

        let mut stuck = Vec::new();
        for (name, h) in handles {
            let join = h.join.lock().expect("join lock poisoned").take();
            if let Some(join) = join {
                if tokio::time::timeout(self.cfg.grace, join).await.is_err() {
                    stuck.push(name);
                }
            }
        }
        stuck.sort_unstable();
        stuck
    }

    /// Builds the component object (no machine yet). A `Some` reason in the
    /// second slot means an error-component stub.
    async fn build(&self, name: &str) -> (ComponentRef, Option<String>) {
        let topics = match self.service_config(name).await {
            Some(t) => t,
            None => {
                let reason = "no matching definition".to_string();
                return (self.error_component(name, &reason), Some(reason));
            }
        };

        let symbol = topics
            .get_child("class")
            .and_then(|n| n.as_leaf().map(|t| t.value.to_text()))
            .or_else(|| self.handlers.implementor_for(name));

        let kind = match symbol {
            Some(symbol) => match self.handlers.instantiate(&symbol, topics.clone()) {
                Some(Ok(handler)) => Kind::CodeBacked(handler),
                Some(Err(e)) => {
                    let reason = format!("creating code-backed component from {symbol}: {e}");
                    return (self.error_component(name, &reason), Some(reason));
                }
                None => {
                    let reason = format!("no handler registered for {symbol}");
                    return (self.error_component(name, &reason), Some(reason));
                }
            },
            None => Kind::Generic,
        };

        (
            Arc::new(Component::new(name, topics, kind, State::New)),
            None,
        )
    }

    /// The `services.<name>` subtree, importing from the recipe source
    /// when config has nothing.
    async fn service_config(&self, name: &str) -> Option<Topics> {
        let path = format!("services.{name}");
        if let Some(Node::Branch(t)) = self.store.find(&path) {
            if !t.is_empty() {
                return Some(t);
            }
        }
        let recipes = self.recipes.as_ref()?;
        let (rname, version) = recipes.best_match(name, &VersionReq::STAR).await?;
        let recipe = recipes.find_recipe(&rname, &version).await?;
        info!(component = %name, version = %version, "importing recipe");
        Some(recipe.import(&self.store))
    }

    /// Synthesizes the `Broken` stand-in for an unresolvable component.
    fn error_component(&self, name: &str, reason: &str) -> ComponentRef {
        error!(
            component = %name,
            reason = %reason,
            event = "component-locate-failed",
            "error locating component"
        );
        let topics = self.store.lookup_topics(&format!("services.{name}"));
        let stub = Component::new(name, topics, Kind::Generic, State::Broken);
        stub.mark_defective();
        stub.mark_errored();
        stub.set_status(Some(reason.to_string()));
        Arc::new(stub)
    }

    /// Parses the dependency declaration, populates the graph, and locates
    /// every dependency (recursively).
    async fn resolve_deps(&self, component: &ComponentRef) {
        let decl = DEPENDENCY_KEYS
            .iter()
            .find_map(|key| component.config().get_child(key));
        let Some(mut node) = decl else { return };

        // The declaration itself may be platform-keyed.
        if let Node::Branch(block) = &node {
            let children = block.children();
            if self.steps.tags.is_tagged(&children) {
                match self.steps.tags.pick(&children) {
                    Some(picked) => node = picked.clone(),
                    None => return,
                }
            }
        }
        let Node::Leaf(topic) = node else { return };

        let parsed = match parse_dependencies(&topic.value.to_text()) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.send(
                    component.name(),
                    Mail::MarkDefective {
                        reason: format!("bad dependency syntax: {e}"),
                    },
                )
                .await;
                return;
            }
        };

        component.set_explicit_deps(parsed.clone());
        let mut edges = component.computed_deps();
        for (dep, required) in parsed {
            edges = self.graph.add_dependency(component.name(), &dep, required);
            let dep_ref = self.locate(&dep).await;
            if dep_ref.state() == State::Broken {
                self.send(
                    component.name(),
                    Mail::MarkErrored {
                        reason: format!("dep broken: {dep}"),
                    },
                )
                .await;
            }
        }
        component.set_computed_deps(edges);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Handler;
    use crate::platform::TagRanks;
    use crate::recipes::{MemoryRecipeSource, Recipe};
    use crate::shell::ShellRunner;
    use crate::store::Tree;
    use semver::Version;
    use std::time::Duration;

    fn registry(store: ConfigStore, recipes: Option<Arc<dyn RecipeSource>>) -> ComponentRegistry {
        let bus = Bus::new(64);
        let steps = StepContext {
            shell: ShellRunner::new(Duration::from_millis(200)),
            tags: Arc::new(TagRanks::from_ranks([("all", 0), ("posix", 3)])),
            bus: bus.clone(),
            root: std::env::temp_dir(),
            default_timeout: None,
        };
        ComponentRegistry::new(
            store,
            bus,
            Config::default(),
            steps,
            Arc::new(HandlerRegistry::new()),
            recipes,
            Arc::new(DependencyGraph::new()),
            Arc::new(StateTable::new()),
        )
    }

    #[tokio::test]
    async fn locate_is_idempotent() {
        let store = ConfigStore::new();
        store.lookup_topics("services.a.lifecycle").set("run", "sleep 30");
        let reg = registry(store, None);

        let first = reg.locate("a").await;
        let second = reg.locate("a").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reg.names(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn missing_definition_is_a_broken_stub() {
        let reg = registry(ConfigStore::new(), None);
        let ghost = reg.locate("ghost").await;
        assert_eq!(ghost.state(), State::Broken);
        assert_eq!(ghost.status_message().as_deref(), Some("no matching definition"));
        assert_eq!(reg.state_of("ghost"), Some(State::Broken));
    }

    #[tokio::test]
    async fn recipe_source_backfills_config() {
        let recipes = Arc::new(MemoryRecipeSource::new());
        recipes.add(
            Recipe::new("cam", Version::new(1, 2, 0))
                .with_lifecycle(Tree::branch([("run", Tree::leaf("sleep 30"))])),
        );
        let store = ConfigStore::new();
        let reg = registry(store.clone(), Some(recipes));

        let cam = reg.locate("cam").await;
        assert_eq!(cam.state(), State::New);
        assert!(store.find("services.cam.lifecycle.run").is_some());
    }

    struct Probe;
    impl Handler for Probe {}

    #[tokio::test]
    async fn class_symbol_builds_code_backed_component() {
        let store = ConfigStore::new();
        store.lookup_topics("services.probe").set("class", "probe-handler");
        let reg = registry(store, None);
        reg.handlers.register("probe-handler", false, |_cfg| Ok(Arc::new(Probe)));

        let c = reg.locate("probe").await;
        assert!(matches!(c.kind(), Kind::CodeBacked(_)));
    }

    #[tokio::test]
    async fn unknown_class_symbol_is_a_broken_stub() {
        let store = ConfigStore::new();
        store.lookup_topics("services.odd").set("class", "nowhere");
        let reg = registry(store, None);
        let c = reg.locate("odd").await;
        assert_eq!(c.state(), State::Broken);
    }

    #[tokio::test]
    async fn dependencies_resolve_into_the_graph() {
        let store = ConfigStore::new();
        let a = store.lookup_topics("services.a");
        a.subtopics("lifecycle").set("run", "sleep 30");
        a.set("dependencies", "b:finished");
        store.lookup_topics("services.b.lifecycle").set("run", "true");
        let reg = registry(store, None);

        let a = reg.locate("a").await;
        let edges = reg.graph().edges_from("a");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].to, "b");
        assert_eq!(edges[0].required, State::Finished);
        assert_eq!(a.explicit_deps(), vec![("b".to_string(), State::Finished)]);
        // The dependency itself was located.
        assert!(reg.state_of("b").is_some());
    }

    #[tokio::test]
    async fn bad_dependency_syntax_is_defective() {
        let store = ConfigStore::new();
        let a = store.lookup_topics("services.a");
        a.subtopics("lifecycle").set("run", "sleep 30");
        a.set("dependencies", "b:nonsense");
        let reg = registry(store, None);

        let a = reg.locate("a").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(a.state(), State::Errored);
        assert!(a.defective());
    }

    #[tokio::test]
    async fn broken_dependency_poisons_the_dependent() {
        let store = ConfigStore::new();
        let x = store.lookup_topics("services.x");
        x.subtopics("lifecycle").set("run", "sleep 30");
        x.set("dependencies", "y");
        let reg = registry(store, None);

        let x = reg.locate("x").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reg.state_of("y"), Some(State::Broken));
        assert_eq!(x.state(), State::Errored);
        assert_eq!(x.status_message().as_deref(), Some("dep broken: y"));
    }
}
