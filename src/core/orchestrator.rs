//! # Orchestrator: the public facade.
//!
//! The [`Orchestrator`] owns the runtime components (event bus, component
//! registry, dependency graph, scheduler, status fan-out) and drives the
//! fleet from startup to graceful termination.
//!
//! ## Architecture
//! ```text
//! OrchestratorBuilder ──► Orchestrator
//!                              │
//!                              ├──► Scheduler (reactor task)
//!                              │        └──► mails to LifecycleMachines
//!                              ├──► status bridge ──► OverallTracker + SinkSet
//!                              └──► run():
//!                                    ├──► start(roots)
//!                                    ├──► wait for OS signal
//!                                    └──► stop(): ordered teardown,
//!                                         grace-bounded, then close all
//! ```
//!
//! ## Rules
//! - Ordered teardown waits **at most** `Config::grace`; components still
//!   active past the bound are reported via `RuntimeError::GraceExceeded`.
//! - At the process boundary, map the result through
//!   [`RuntimeError::exit_code`]: 0 clean, 1 configuration error,
//!   2 resolution failure.
//!
//! ```no_run
//! use edgevisor::{Config, Orchestrator, LogSink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let orchestrator = Orchestrator::builder(Config::default())
//!         .sink(Arc::new(LogSink))
//!         .build();
//!     let result = orchestrator.run(["main"]).await;
//!     std::process::exit(match result {
//!         Ok(()) => 0,
//!         Err(e) => e.exit_code(),
//!     });
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::components::HandlerRegistry;
use crate::config::Config;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::graph::DependencyGraph;
use crate::platform::TagRanks;
use crate::recipes::RecipeSource;
use crate::shell::ShellRunner;
use crate::state::{Overall, State};
use crate::status::{spawn_bridge, OverallTracker, SinkSet, StatusSink};
use crate::store::ConfigStore;

use super::machine::StateTable;
use super::registry::ComponentRegistry;
use super::scheduler::{Command, Scheduler};
use super::steps::StepContext;

/// Builder wiring the orchestrator's collaborators.
pub struct OrchestratorBuilder {
    cfg: Config,
    store: ConfigStore,
    tags: Option<TagRanks>,
    recipes: Option<Arc<dyn RecipeSource>>,
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl OrchestratorBuilder {
    /// Uses an existing configuration store (defaults to an empty one).
    pub fn store(mut self, store: ConfigStore) -> Self {
        self.store = store;
        self
    }

    /// Overrides the detected platform tag table (tests, cross-targeting).
    pub fn tags(mut self, tags: TagRanks) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Attaches a recipe source consulted on config misses.
    pub fn recipes(mut self, recipes: Arc<dyn RecipeSource>) -> Self {
        self.recipes = Some(recipes);
        self
    }

    /// Registers a status sink.
    pub fn sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Wires everything and spawns the scheduler and status bridge.
    pub fn build(self) -> Orchestrator {
        let cfg = self.cfg;
        let bus = Bus::new(cfg.bus_capacity);
        let tags = Arc::new(self.tags.unwrap_or_else(TagRanks::detect));
        let handlers = Arc::new(HandlerRegistry::new());
        let graph = Arc::new(DependencyGraph::new());
        let states: Arc<StateTable> = Arc::new(StateTable::new());
        let tracker = Arc::new(OverallTracker::new());
        let cancel = CancellationToken::new();

        let steps = StepContext {
            shell: ShellRunner::new(cfg.grace),
            tags,
            bus: bus.clone(),
            root: cfg.root.clone(),
            default_timeout: cfg.step_timeout,
        };

        let registry = Arc::new(ComponentRegistry::new(
            self.store,
            bus.clone(),
            cfg.clone(),
            steps,
            handlers.clone(),
            self.recipes,
            graph.clone(),
            states.clone(),
        ));

        let sinks = Arc::new(SinkSet::new(self.sinks, bus.clone()));
        spawn_bridge(bus.clone(), sinks, tracker.clone(), cancel.clone());

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let scheduler =
            Scheduler::new(registry.clone(), graph, states, bus.clone(), cfg.clone());
        tokio::spawn(scheduler.run(cmd_rx, cancel.clone()));

        Orchestrator {
            cfg,
            bus,
            handlers,
            registry,
            tracker,
            cmd: cmd_tx,
            cancel,
        }
    }
}

/// Owns the runtime and drives the component fleet.
pub struct Orchestrator {
    cfg: Config,
    bus: Bus,
    handlers: Arc<HandlerRegistry>,
    registry: Arc<ComponentRegistry>,
    tracker: Arc<OverallTracker>,
    cmd: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Starts building an orchestrator.
    pub fn builder(cfg: Config) -> OrchestratorBuilder {
        OrchestratorBuilder {
            cfg,
            store: ConfigStore::new(),
            tags: None,
            recipes: None,
            sinks: Vec::new(),
        }
    }

    /// The process-wide handler registry; register code-backed handlers
    /// before starting the roots that use them.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// The component registry.
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// The runtime event bus; subscribe for raw events (stuck diagnostics,
    /// step failures) beyond what status sinks deliver.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Current state of a component, if located.
    pub fn state_of(&self, name: &str) -> Option<State> {
        self.registry.state_of(name)
    }

    /// Current aggregate fleet health.
    pub fn overall(&self) -> Overall {
        self.tracker.overall()
    }

    /// Drives `roots` and their transitive dependencies toward `Running`.
    pub async fn start<I, S>(&self, roots: I) -> Result<(), RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roots: Vec<String> = roots.into_iter().map(Into::into).collect();
        self.cmd
            .send(Command::Start { roots })
            .await
            .map_err(|_| RuntimeError::Closed)
    }

    /// External install action: clears the sticky error of an `Errored`
    /// component and drives it through a fresh install. No-op for
    /// components that are `Broken`, defective, or mid-flight.
    pub async fn reinstall(&self, name: &str) {
        self.registry.send(name, super::machine::Mail::Install).await;
    }

    /// Tears the fleet down in reverse dependency order.
    ///
    /// Waits at most `Config::grace` for the ordered teardown, then cancels
    /// every machine regardless. Components still active past the bound
    /// are reported in `RuntimeError::GraceExceeded`.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd
            .send(Command::StopAll { done: done_tx })
            .await
            .map_err(|_| RuntimeError::Closed)?;

        let graceful = matches!(timeout(self.cfg.grace, done_rx).await, Ok(Ok(())));
        let result = if graceful {
            self.bus.publish(Event::now(EventKind::AllStoppedWithin));
            Ok(())
        } else {
            let stuck: Vec<String> = self
                .registry
                .names()
                .into_iter()
                .filter(|n| {
                    self.registry
                        .state_of(n)
                        .is_some_and(|s| !s.is_quiescent())
                })
                .collect();
            self.bus.publish(
                Event::now(EventKind::GraceExceeded)
                    .with_reason(stuck.join(", ")),
            );
            Err(RuntimeError::GraceExceeded {
                grace: self.cfg.grace,
                stuck,
            })
        };

        // Backstop: cancel every machine and the reactor.
        let still_stuck = self.registry.close_all().await;
        self.cancel.cancel();
        if result.is_ok() && !still_stuck.is_empty() {
            return Err(RuntimeError::GraceExceeded {
                grace: self.cfg.grace,
                stuck: still_stuck,
            });
        }
        result
    }

    /// Runs `roots` until an OS termination signal, then tears down.
    ///
    /// ### Exit conditions
    /// - **Signal received** → ordered teardown, `Ok(())` when everything
    ///   quiesced within grace
    /// - **Teardown overran the grace** → `Err(GraceExceeded)` with the
    ///   stuck component names
    pub async fn run<I, S>(&self, roots: I) -> Result<(), RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start(roots).await?;
        let _ = wait_for_shutdown_signal().await;
        self.bus.publish(Event::now(EventKind::ShutdownRequested));
        info!("shutdown signal received");
        self.stop().await
    }
}

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners. Returns `Ok(())` when
/// any signal is received, or `Err` if signal registration fails.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal (Ctrl-C on non-Unix platforms).
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
