//! # Scheduler: dependency-ordered startup and shutdown.
//!
//! An event-driven reactor. It wakes on (a) any component transition,
//! (b) configuration changes, (c) external start/stop commands, and on
//! each wake recomputes the ready frontier and advances eligible
//! components by posting mails to their machines.
//!
//! ## Startup
//! 1. Seed the target set with the requested roots and their transitive
//!    dependencies.
//! 2. Order it leaves-first; a cycle marks the last-touched node `Errored`
//!    (reason `dependency cycle`) and drops it from the set.
//! 3. For each component below target whose dependencies are satisfied,
//!    issue `Install` (from `New`) or `Start` (from `AwaitingStartup`).
//!    Independent components advance concurrently; a component never
//!    starts before every dependency reached its required state.
//!
//! ## Teardown
//! Reverse order: a component is asked to stop only after every dependent
//! is quiescent. A `Running` component whose dependency drops below the
//! required state is stopped the same way during normal operation.
//!
//! ## Progress guarantee
//! If nothing changed state for a full stuck window while some component
//! is below target, a `Stuck` event is published naming the blocking edge.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::events::{Bus, Event, EventKind};
use crate::graph::DependencyGraph;
use crate::state::State;

use super::machine::{Mail, StateTable};
use super::registry::ComponentRegistry;

/// External commands understood by the scheduler.
pub(crate) enum Command {
    /// Drive `roots` (and their transitive deps) toward `Running`.
    Start { roots: Vec<String> },
    /// Tear everything down in reverse dependency order; the sender is
    /// signalled once every target is quiescent.
    StopAll { done: oneshot::Sender<()> },
}

/// Which direction the reactor is currently driving the fleet.
enum Phase {
    Idle,
    Up,
    Down(Option<oneshot::Sender<()>>),
}

/// Dependency-ordered reactor over the component fleet.
pub(crate) struct Scheduler {
    registry: Arc<ComponentRegistry>,
    graph: Arc<DependencyGraph>,
    states: Arc<StateTable>,
    bus: Bus,
    cfg: Config,

    roots: Vec<String>,
    poisoned: HashSet<String>,
    phase: Phase,
    /// Sequence of the last observed transition, for stuck detection.
    last_seq: u64,
    checked_seq: u64,
}

impl Scheduler {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        graph: Arc<DependencyGraph>,
        states: Arc<StateTable>,
        bus: Bus,
        cfg: Config,
    ) -> Self {
        Self {
            registry,
            graph,
            states,
            bus,
            cfg,
            roots: Vec::new(),
            poisoned: HashSet::new(),
            phase: Phase::Idle,
            last_seq: 0,
            checked_seq: 0,
        }
    }

    /// Reactor loop; returns when cancelled or the command channel closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let mut bus_rx = self.bus.subscribe();
        let mut cfg_rx = self.registry.store().watch();
        let mut stuck = tokio::time::interval(self.cfg.stuck_after);
        stuck.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => break,
                },
                ev = bus_rx.recv() => match ev {
                    Ok(ev) => {
                        if ev.kind == EventKind::StateChanged {
                            self.last_seq = self.last_seq.max(ev.seq);
                            self.tick().await;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        // Missed transitions; reconcile from the state table.
                        self.tick().await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                change = cfg_rx.recv() => {
                    if let Ok(change) = change {
                        if change.path.starts_with("services.") {
                            self.bus.publish(
                                Event::now(EventKind::ConfigChanged).with_reason(change.path),
                            );
                            self.tick().await;
                        }
                    }
                },
                _ = stuck.tick() => self.check_stuck().await,
            }
        }
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { roots } => {
                info!(roots = ?roots, "start requested");
                self.bus.publish(
                    Event::now(EventKind::StartRequested).with_reason(roots.join(", ")),
                );
                for root in &roots {
                    self.registry.locate(root).await;
                }
                self.roots = roots;
                self.phase = Phase::Up;
                self.tick().await;
            }
            Command::StopAll { done } => {
                self.bus
                    .publish(Event::now(EventKind::StopRequested));
                self.phase = Phase::Down(Some(done));
                self.tick().await;
            }
        }
    }

    fn state_of(&self, name: &str) -> State {
        self.states.get(name).map(|s| *s).unwrap_or(State::New)
    }

    /// Leaves-first ordering of the current target set; cycle nodes are
    /// errored and dropped.
    async fn ordered_targets(&mut self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .graph
            .transitive_closure(&self.roots)
            .into_iter()
            .filter(|n| !self.poisoned.contains(n))
            .collect();
        loop {
            match self.graph.topo_order(&targets) {
                Ok(order) => return order,
                Err(cycle) => {
                    if cycle.node.is_empty() || !targets.iter().any(|n| *n == cycle.node) {
                        return targets;
                    }
                    warn!(component = %cycle.node, "dependency cycle");
                    self.registry
                        .send(
                            &cycle.node,
                            Mail::MarkErrored {
                                reason: "dependency cycle".to_string(),
                            },
                        )
                        .await;
                    self.poisoned.insert(cycle.node.clone());
                    targets.retain(|n| *n != cycle.node);
                }
            }
        }
    }

    async fn tick(&mut self) {
        if matches!(self.phase, Phase::Up) {
            self.advance().await;
        } else if matches!(self.phase, Phase::Down(_)) {
            self.descend().await;
        }
    }

    /// Drives the ready frontier toward `Running`.
    async fn advance(&mut self) {
        let order = self.ordered_targets().await;
        for name in &order {
            match self.state_of(name) {
                State::Broken => {
                    // Poison direct dependents that have not started yet.
                    for dependent in self.graph.dependents_of(name) {
                        if !order.contains(&dependent) {
                            continue;
                        }
                        if matches!(
                            self.state_of(&dependent),
                            State::New
                                | State::Installing
                                | State::AwaitingStartup
                                | State::Starting
                        ) {
                            self.registry
                                .send(
                                    &dependent,
                                    Mail::MarkErrored {
                                        reason: format!("dep broken: {name}"),
                                    },
                                )
                                .await;
                        }
                    }
                }
                State::New => {
                    if self.satisfied(name) {
                        self.registry.send(name, Mail::Install).await;
                    }
                }
                State::AwaitingStartup => {
                    if self.satisfied(name) {
                        self.registry.send(name, Mail::Start).await;
                    }
                }
                State::Running => {
                    // A dependency dropped below its required state.
                    if !self.satisfied(name) {
                        let reason = self
                            .graph
                            .blocking_edge(name, |n| self.state_of(n))
                            .map(|e| format!("dep dropped: {} < {}", e.to, e.required));
                        self.registry.send(name, Mail::Stop { reason }).await;
                    }
                }
                _ => {}
            }
        }
    }

    fn satisfied(&self, name: &str) -> bool {
        self.graph.satisfied_by(name, |n| self.state_of(n))
    }

    /// Tears targets down, dependents strictly before dependencies.
    async fn descend(&mut self) {
        let order = self.ordered_targets().await;
        let mut all_quiescent = true;

        for name in order.iter().rev() {
            let state = self.state_of(name);
            if state.is_quiescent() {
                continue;
            }
            all_quiescent = false;
            if state == State::Stopping {
                continue;
            }
            let dependents_quiet = self
                .graph
                .dependents_of(name)
                .iter()
                .filter(|d| order.contains(*d))
                .all(|d| self.state_of(d).is_quiescent());
            if dependents_quiet {
                self.registry.send(name, Mail::Stop { reason: None }).await;
            }
        }

        if all_quiescent {
            if let Phase::Down(done) = &mut self.phase {
                if let Some(done) = done.take() {
                    let _ = done.send(());
                }
            }
            self.phase = Phase::Idle;
        }
    }

    /// Publishes a `Stuck` diagnostic when no transition happened for a
    /// full window while something is still below target.
    async fn check_stuck(&mut self) {
        if !matches!(self.phase, Phase::Up) {
            self.checked_seq = self.last_seq;
            return;
        }
        if self.last_seq != self.checked_seq {
            self.checked_seq = self.last_seq;
            return;
        }
        let order = self.ordered_targets().await;
        for name in &order {
            let state = self.state_of(name);
            if state.is_terminal() || state == State::Running {
                continue;
            }
            if let Some(edge) = self.graph.blocking_edge(name, |n| self.state_of(n)) {
                let dep_state = self.state_of(&edge.to);
                let reason = format!(
                    "{name} waiting for {} >= {} ({} is {dep_state})",
                    edge.to, edge.required, edge.to
                );
                warn!(component = %name, reason = %reason, "stuck");
                self.bus.publish(
                    Event::now(EventKind::Stuck)
                        .with_component(name)
                        .with_reason(reason),
                );
                break;
            }
        }
    }
}
