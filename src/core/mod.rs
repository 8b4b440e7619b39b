//! Runtime core: orchestration and lifecycle.
//!
//! This module contains the embedded implementation of the edgevisor
//! runtime. The public API re-exported from here is [`Orchestrator`] (and
//! its builder) plus [`ComponentRegistry`]; everything else is an internal
//! building block the orchestrator wires together.
//!
//! ## Files & responsibilities
//! - **orchestrator.rs**: public facade; owns Bus, Registry, Graph,
//!   SinkSet, OverallTracker; runs until an OS signal; grace-bounded
//!   teardown.
//! - **registry.rs**: component cache; instantiates script-driven and
//!   code-backed components, synthesizes error-components, resolves
//!   declared dependencies into the graph, spawns machines.
//! - **scheduler.rs**: event-driven reactor; computes the ready frontier
//!   each wake, advances eligible components, tears down in reverse order,
//!   emits stuck diagnostics.
//! - **machine.rs**: per-component serial actor implementing the lifecycle
//!   transition table.
//! - **steps.rs**: step resolution (platform tags, skip guards, timeouts)
//!   and execution via the shell runner.
//!
//! ## Event data-plane (who publishes & who consumes)
//!
//! Producers (publish to Bus):
//! - **LifecycleMachine** → `StateChanged`, `StepStarting`, `StepSkipped`,
//!   `StepFailed`, `TimerFired`
//! - **Scheduler** → `StartRequested`, `StopRequested`, `ConfigChanged`,
//!   `Stuck`
//! - **Registry** → the initial `Broken` transition of error-components
//! - **Orchestrator** → `ShutdownRequested`, `AllStoppedWithin`,
//!   `GraceExceeded`
//! - **Status bridge** → `OverallChanged`, `SinkOverflow`
//!
//! Consumers (subscribe to Bus):
//! - **Scheduler** (reacts to `StateChanged`, reconciles on lag)
//! - **Status bridge** (fans out to sinks, tracks overall health)
//!
//! ## Wiring (module-level flow)
//! ```text
//! Application code
//!   └─ builds recipes/config, creates Orchestrator, calls run(roots)
//!
//! Orchestrator::run()
//!   ├─ Scheduler task          ──┐
//!   ├─ status bridge task        │ both subscribe to Bus
//!   ├─ Command::Start{roots}     │
//!   └─ wait: OS signal → Command::StopAll → grace → close_all
//!
//! Scheduler tick (on every transition / config change / command)
//!   ├─ topo-order the target set (cycles → Errored, dropped)
//!   ├─ New + deps satisfied             → Mail::Install
//!   ├─ AwaitingStartup + deps satisfied → Mail::Start
//!   ├─ Running + dep dropped            → Mail::Stop
//!   └─ no progress for a full window    → Stuck{blocking edge}
//!
//! LifecycleMachine (per component, strictly serial)
//!   Install → Installing → AwaitingStartup (retry once, then Broken)
//!   Start   → Starting → Running | Finished (timer) | Errored
//!   RunExited{0} → Finished; RunExited{≠0} → recover step → Errored
//!   TimerFired(Finished) → Running → re-exec run
//!   Stop → Stopping → shutdown step → terminate child → New/Finished
//! ```

mod machine;
mod registry;
mod scheduler;
mod steps;

mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use registry::ComponentRegistry;
