//! # LifecycleMachine: per-component state machine.
//!
//! One machine supervises one component. All state mutations for a
//! component happen inside its machine task, which consumes a bounded
//! mailbox strictly serially, so exactly one lifecycle tick is in flight
//! per component at any time. Different components progress in parallel.
//!
//! ## Mailbox
//! ```text
//! Scheduler ──► Install / Start / Stop / MarkErrored / MarkDefective
//! ShellRunner ─► RunExited{code}     (background run child exited)
//! Periodicity ─► TimerFired
//! Registry ───► (cancellation token) final close
//! ```
//!
//! ## Transition table
//! ```text
//! New             ─ Install, deps satisfied ─► Installing ─ ok ──► AwaitingStartup
//!                                                        ─ fail (after 1 retry) ──► Broken
//! AwaitingStartup ─ Start, deps satisfied ──► Starting   ─ ok, timer ───► Finished (arm)
//!                                                        ─ ok, no timer ► Running (run in background)
//!                                                        ─ fail (after 1 retry) ──► Errored
//! Running         ─ run exits 0 ──► Finished              (re-arm timer if any)
//!                 ─ run exits ≠0 ─► recover step, Errored
//!                 ─ Stop (dep dropped / teardown) ──► Stopping
//! Finished        ─ TimerFired ──► Running (re-exec run)
//! Stopping        ─ shutdown done ──► New (or Finished when the stop hit
//!                                     a completed one-shot)
//! Errored         ─ Install ──► Installing (sticky cleared, one retry)
//!                 ─ second error without install ──► Broken
//! ```
//!
//! ## Rules
//! - The state cell and the shared state table are updated **before** the
//!   transition event is published.
//! - Timers are disarmed synchronously before shutdown steps run.
//! - A fire arriving while the owner is not `Finished` is dropped.
//! - Synchronous steps retry once when the failure is retryable; the `run`
//!   step never retries on its own.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::components::{ComponentRef, Kind};
use crate::error::StepError;
use crate::events::{Bus, Event, EventKind};
use crate::graph::DependencyGraph;
use crate::shell::RunningChild;
use crate::state::State;
use crate::timer::Periodicity;

use super::steps::{ResolvedStep, StepContext, StepRun};

/// Shared component-name → state table, written by each machine for its
/// own component and read by the scheduler and dependency guards.
pub(crate) type StateTable = DashMap<String, State>;

/// Messages a lifecycle machine understands.
#[derive(Debug)]
pub(crate) enum Mail {
    /// Run the `install` step (also the recovery action from `Errored`).
    Install,
    /// Run the `startup` step and enter `Running`/`Finished`.
    Start,
    /// Tear the component down (dep dropped, ordered shutdown).
    Stop { reason: Option<String> },
    /// Mark the component `Errored` (dep broken, dependency cycle).
    MarkErrored { reason: String },
    /// Mark the component permanently defective (bad declaration).
    MarkDefective { reason: String },
    /// The periodic timer fired.
    TimerFired,
    /// The background `run` child exited.
    RunExited { code: Option<i32> },
}

/// Per-component supervisor driving the lifecycle state machine.
pub(crate) struct LifecycleMachine {
    component: ComponentRef,
    bus: Bus,
    steps: StepContext,
    graph: Arc<DependencyGraph>,
    states: Arc<StateTable>,
    mail_tx: mpsc::Sender<Mail>,
    grace: Duration,
    timer: Option<Periodicity>,
    run_child: Option<RunningChild>,
    handler_run: Option<(CancellationToken, JoinHandle<()>)>,
}

impl LifecycleMachine {
    /// Spawns the machine task for `component`.
    pub fn spawn(
        component: ComponentRef,
        bus: Bus,
        steps: StepContext,
        graph: Arc<DependencyGraph>,
        states: Arc<StateTable>,
        grace: Duration,
        cancel: CancellationToken,
    ) -> (mpsc::Sender<Mail>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let machine = Self {
            component,
            bus,
            steps,
            graph,
            states,
            mail_tx: tx.clone(),
            grace,
            timer: None,
            run_child: None,
            handler_run: None,
        };
        let join = tokio::spawn(machine.run(rx, cancel));
        (tx, join)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Mail>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.do_stop(None).await;
                    break;
                }
                mail = rx.recv() => match mail {
                    Some(mail) => self.handle(mail).await,
                    None => {
                        self.do_stop(None).await;
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&mut self, mail: Mail) {
        debug!(component = %self.component.name(), mail = ?mail, "handling");
        match mail {
            Mail::Install => self.do_install().await,
            Mail::Start => self.do_start().await,
            Mail::Stop { reason } => self.do_stop(reason).await,
            Mail::MarkErrored { reason } => self.on_mark_errored(reason),
            Mail::MarkDefective { reason } => self.on_mark_defective(reason),
            Mail::TimerFired => self.on_timer().await,
            Mail::RunExited { code } => self.on_run_exit(code).await,
        }
    }

    /// Updates the state cell and the shared table, then publishes the
    /// transition. The publish order is what lets dependents trust the
    /// table the moment they observe the event.
    fn set_state(&self, to: State, reason: Option<String>) {
        let from = self.component.state();
        if from == to {
            return;
        }
        self.component.set_state(to);
        self.states
            .insert(self.component.name().to_string(), to);
        let mut ev = Event::now(EventKind::StateChanged)
            .with_component(self.component.name())
            .with_transition(from, to);
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        self.bus.publish(ev);
    }

    /// Sticky-error bookkeeping: first error → `Errored`, second error
    /// without a fresh install → `Broken`.
    fn fail(&self, reason: String) {
        let count = self.component.mark_errored();
        self.component.set_status(Some(reason.clone()));
        if count >= 2 {
            self.set_state(State::Broken, Some(reason));
        } else {
            self.set_state(State::Errored, Some(reason));
        }
    }

    /// Runs a synchronous step for the component's kind.
    async fn exec_sync(
        &self,
        step: &str,
        fallback_timeout: Option<Duration>,
    ) -> Result<StepRun, StepError> {
        match self.component.kind().clone() {
            Kind::Generic => {
                self.steps
                    .run_sync(&self.component, step, fallback_timeout)
                    .await
            }
            Kind::CodeBacked(handler) => {
                self.bus.publish(
                    Event::now(EventKind::StepStarting)
                        .with_component(self.component.name())
                        .with_step(step),
                );
                let res = match step {
                    "install" => handler.install().await,
                    "startup" => handler.startup().await,
                    "shutdown" => handler.shutdown().await,
                    _ => Ok(()),
                };
                match res {
                    Ok(()) => Ok(StepRun::Done),
                    Err(e) => {
                        self.bus.publish(
                            Event::now(EventKind::StepFailed)
                                .with_component(self.component.name())
                                .with_step(step)
                                .with_reason(e.to_string()),
                        );
                        Err(e)
                    }
                }
            }
        }
    }

    /// Runs a synchronous step with one automatic retry on retryable
    /// failures.
    async fn exec_sync_with_retry(&self, step: &str) -> Result<StepRun, StepError> {
        match self.exec_sync(step, None).await {
            Err(e) if e.is_retryable() => {
                warn!(component = %self.component.name(), step = %step, error = %e, "retrying step");
                self.exec_sync(step, None).await
            }
            other => other,
        }
    }

    async fn do_install(&mut self) {
        if self.component.defective() {
            return;
        }
        if !matches!(self.component.state(), State::New | State::Errored) {
            return;
        }
        self.component.clear_errors();
        self.set_state(State::Installing, None);
        match self.exec_sync_with_retry("install").await {
            Ok(_) => self.set_state(State::AwaitingStartup, None),
            Err(e) => {
                // Install failures are not recoverable by another retry.
                self.component.mark_errored();
                self.set_state(State::Broken, Some(format!("install failed: {e}")));
            }
        }
    }

    async fn do_start(&mut self) {
        if self.component.state() != State::AwaitingStartup {
            return;
        }
        let states = self.states.clone();
        if !self.graph.satisfied_by(self.component.name(), |n| {
            states.get(n).map(|s| *s).unwrap_or(State::New)
        }) {
            return;
        }
        self.set_state(State::Starting, None);

        // The timer block is re-read on every start so a stopped component
        // can be driven through a full cycle again.
        self.timer = match self
            .component
            .lifecycle()
            .map(|lc| Periodicity::from_lifecycle(&lc))
            .transpose()
        {
            Ok(timer) => timer.flatten(),
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };

        match self.exec_sync_with_retry("startup").await {
            Ok(_) => {
                if self.timer.is_some() {
                    // A declared timer precludes the foreground run: the
                    // run step only executes on fires.
                    self.set_state(State::Finished, None);
                    self.arm_timer();
                } else {
                    self.launch_run().await;
                }
            }
            Err(e) => self.fail(format!("startup failed: {e}")),
        }
    }

    /// Launches the `run` step in the background and enters `Running`, or
    /// parks in `Finished` when there is nothing to run.
    async fn launch_run(&mut self) {
        match self.component.kind().clone() {
            Kind::CodeBacked(handler) => {
                let token = CancellationToken::new();
                let tx = self.mail_tx.clone();
                let child_token = token.clone();
                let join = tokio::spawn(async move {
                    let code = match handler.run(child_token).await {
                        Ok(()) => 0,
                        Err(_) => 1,
                    };
                    let _ = tx.send(Mail::RunExited { code: Some(code) }).await;
                });
                self.handler_run = Some((token, join));
                self.set_state(State::Running, None);
            }
            Kind::Generic => match self.steps.resolve_step(&self.component, "run").await {
                Ok(ResolvedStep::Nothing) => {
                    self.set_state(State::Finished, None);
                    self.arm_timer();
                }
                Ok(ResolvedStep::Skipped) => {
                    self.bus.publish(
                        Event::now(EventKind::StepSkipped)
                            .with_component(self.component.name())
                            .with_step("run"),
                    );
                    self.set_state(State::Finished, None);
                    self.arm_timer();
                }
                Ok(ResolvedStep::Command { cmd, .. }) => {
                    self.bus.publish(
                        Event::now(EventKind::StepStarting)
                            .with_component(self.component.name())
                            .with_step("run"),
                    );
                    self.component.set_status(Some(cmd.clone()));
                    let tx = self.mail_tx.clone();
                    match self.steps.shell.run_background(
                        self.component.name(),
                        "run",
                        &cmd,
                        &self.component.setenv(),
                        move |code| {
                            let _ = tx.try_send(Mail::RunExited { code });
                        },
                    ) {
                        Ok(child) => {
                            self.run_child = Some(child);
                            self.set_state(State::Running, None);
                        }
                        Err(e) => self.fail(format!("run failed to launch: {e}")),
                    }
                }
                Err(e) => self.fail(format!("run step unresolvable: {e}")),
            },
        }
    }

    async fn on_run_exit(&mut self, code: Option<i32>) {
        self.run_child = None;
        self.handler_run = None;
        if self.component.state() != State::Running {
            return;
        }
        self.component.set_status(None);
        if code == Some(0) {
            self.set_state(State::Finished, None);
            self.arm_timer();
        } else {
            // Best-effort recover hook before surfacing the error.
            let _ = self.exec_sync("recover", None).await;
            let mut ev = Event::now(EventKind::StepFailed)
                .with_component(self.component.name())
                .with_step("run")
                .with_exit(code);
            ev = ev.with_reason(format!("run exited with {code:?}"));
            self.bus.publish(ev);
            self.fail(format!("run exited with {code:?}"));
        }
    }

    async fn on_timer(&mut self) {
        if self.component.state() != State::Finished {
            // Coalesced: the owner is still busy, drop the fire.
            return;
        }
        self.bus.publish(
            Event::now(EventKind::TimerFired).with_component(self.component.name()),
        );
        self.set_state(State::Running, Some("timer".to_string()));
        // Re-execute the run step; without one, park again and re-arm.
        self.launch_run().await;
    }

    async fn do_stop(&mut self, reason: Option<String>) {
        let prior = self.component.state();
        if let Some(timer) = self.timer.take() {
            timer.shutdown();
        }
        if !matches!(
            prior,
            State::AwaitingStartup | State::Starting | State::Running | State::Finished
        ) {
            return;
        }
        self.set_state(State::Stopping, reason);

        // Startup may have had side effects; anything earlier has not.
        if matches!(prior, State::Starting | State::Running | State::Finished) {
            let _ = self.exec_sync("shutdown", Some(self.grace)).await;
        }

        if let Some(child) = self.run_child.take() {
            child.stop().await;
        }
        if let Some((token, join)) = self.handler_run.take() {
            token.cancel();
            let _ = join.await;
        }
        self.component.set_status(None);

        if prior == State::Finished {
            self.set_state(State::Finished, None);
        } else {
            self.set_state(State::New, None);
        }
    }

    fn on_mark_errored(&mut self, reason: String) {
        let state = self.component.state();
        if state.is_terminal() || matches!(state, State::Running | State::Stopping) {
            return;
        }
        self.fail(reason);
    }

    fn on_mark_defective(&mut self, reason: String) {
        if self.component.state() == State::Broken {
            return;
        }
        self.component.mark_defective();
        self.component.mark_errored();
        self.set_state(State::Errored, Some(reason));
    }

    fn arm_timer(&self) {
        if let Some(timer) = &self.timer {
            let tx = self.mail_tx.clone();
            timer.arm(move || {
                let _ = tx.try_send(Mail::TimerFired);
            });
        }
    }
}
