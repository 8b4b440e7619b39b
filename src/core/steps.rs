//! # Lifecycle step resolution and execution.
//!
//! Bridges a component's `lifecycle` config subtree to the
//! [`ShellRunner`](crate::shell::ShellRunner): picks the
//! platform-appropriate variant of a step, evaluates `skipif`/`doif`
//! guards, applies timeouts, and runs the command.
//!
//! ## Step forms
//! A step child of the lifecycle block may be:
//! - a **raw command** leaf: `install: "apt-get install -y foo"`
//! - a **structured block**: `{ script, skipif | doif, timeout }`
//! - a **platform-tagged map** whose children are themselves step nodes,
//!   keyed by tag (`posix`, `ubuntu`, `all`, ...)
//!
//! The lifecycle block itself may also be platform-tagged above the step
//! level. A block is treated as structured when it carries any of the
//! structured keys; otherwise, if any child key is a known host tag, it is
//! a platform map and the most specific child wins.
//!
//! ## Rules
//! - A step missing for the selected platform is skipped and treated as
//!   success.
//! - `skipif` skips the step when its expression holds; `doif` skips when
//!   it does not. Declaring both on one step is an error.
//! - Guard expressions: `!` negates; `onpath <cmd>`, `exists <path>`
//!   (`~` expands against the supervisor root), `true`, else the text is
//!   run as a shell expression and holds iff it exits 0 with empty stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::components::Component;
use crate::error::StepError;
use crate::events::{Bus, Event, EventKind};
use crate::platform::TagRanks;
use crate::shell::ShellRunner;
use crate::store::{Node, Topics};

/// Keys that mark a block as a structured step rather than a platform map.
const STRUCTURED_KEYS: [&str; 4] = ["script", "skipif", "doif", "timeout"];

/// Outcome of a synchronous step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepRun {
    /// The step ran and succeeded.
    Done,
    /// No step was declared for this name/platform.
    NothingDone,
    /// A guard skipped the step (treated as success).
    Skipped,
}

/// A step resolved down to something executable.
pub(crate) enum ResolvedStep {
    Nothing,
    Skipped,
    Command {
        cmd: String,
        timeout: Option<Duration>,
    },
}

/// Shared context for resolving and running lifecycle steps.
#[derive(Clone)]
pub(crate) struct StepContext {
    pub shell: ShellRunner,
    pub tags: Arc<TagRanks>,
    pub bus: Bus,
    /// Root directory for `~` expansion in `exists` guards.
    pub root: PathBuf,
    /// Fallback timeout for synchronous steps.
    pub default_timeout: Option<Duration>,
}

impl StepContext {
    /// Resolves `step` for `component`, evaluating platform tags and skip
    /// guards.
    pub async fn resolve_step(
        &self,
        component: &Component,
        step: &str,
    ) -> Result<ResolvedStep, StepError> {
        let Some(lifecycle) = component.lifecycle() else {
            return Ok(ResolvedStep::Nothing);
        };

        // Descend through platform maps above the step level.
        let mut scope = lifecycle;
        loop {
            let children = scope.children();
            if !self.tags.is_tagged(&children) {
                break;
            }
            match self.tags.pick(&children) {
                Some(Node::Branch(t)) => scope = t.clone(),
                _ => return Ok(ResolvedStep::Nothing),
            }
        }

        let Some(mut node) = scope.get_child(step) else {
            return Ok(ResolvedStep::Nothing);
        };

        // Descend through platform maps below the step key.
        loop {
            node = match node {
                Node::Leaf(topic) => {
                    return Ok(ResolvedStep::Command {
                        cmd: topic.value.to_text(),
                        timeout: None,
                    });
                }
                Node::Branch(block) => {
                    let children = block.children();
                    let structured = STRUCTURED_KEYS.iter().any(|k| children.contains_key(*k));
                    if !structured && self.tags.is_tagged(&children) {
                        match self.tags.pick(&children) {
                            Some(next) => next.clone(),
                            None => return Ok(ResolvedStep::Nothing),
                        }
                    } else {
                        return self.resolve_structured(component, step, &block).await;
                    }
                }
            };
        }
    }

    /// Resolves a structured `{ script, skipif | doif, timeout }` block.
    async fn resolve_structured(
        &self,
        component: &Component,
        step: &str,
        block: &Topics,
    ) -> Result<ResolvedStep, StepError> {
        if self.should_skip(step, block).await? {
            info!(component = %component.name(), step = %step, "skipping step");
            return Ok(ResolvedStep::Skipped);
        }
        let script = block
            .get_child("script")
            .and_then(|n| n.as_leaf().map(|t| t.value.to_text()))
            .ok_or_else(|| StepError::MissingScript {
                step: step.to_string(),
            })?;
        let timeout = block
            .get_child("timeout")
            .and_then(|n| n.as_leaf().and_then(|t| t.value.as_duration()));
        Ok(ResolvedStep::Command {
            cmd: script,
            timeout,
        })
    }

    /// Evaluates the `skipif`/`doif` guard of a structured block.
    ///
    /// Returns true when the step must be skipped. Declaring both guards on
    /// one step is rejected.
    async fn should_skip(&self, step: &str, block: &Topics) -> Result<bool, StepError> {
        let leaf = |key: &str| {
            block
                .get_child(key)
                .and_then(|n| n.as_leaf().map(|t| t.value.to_text()))
        };
        let skipif = leaf("skipif");
        let doif = leaf("doif");

        let (expr, mut invert) = match (skipif, doif) {
            (Some(_), Some(_)) => {
                return Err(StepError::Guard {
                    step: step.to_string(),
                    reason: "skipif and doif are mutually exclusive".to_string(),
                });
            }
            (Some(e), None) => (e, false),
            (None, Some(e)) => (e, true),
            (None, None) => return Ok(false),
        };

        let mut expr = expr.trim();
        if let Some(rest) = expr.strip_prefix('!') {
            expr = rest.trim();
            invert = !invert;
        }

        let holds = if let Some(cmd) = expr.strip_prefix("onpath ") {
            ShellRunner::which(cmd.trim()).is_some()
        } else if let Some(path) = expr.strip_prefix("exists ") {
            self.de_tilde(path.trim()).exists()
        } else if expr == "true" {
            true
        } else {
            // Shell expression: holds iff exit 0 and nothing on stderr.
            self.shell.successful(expr).await
        };

        Ok(holds ^ invert)
    }

    /// Expands a leading `~` against the supervisor root.
    fn de_tilde(&self, path: &str) -> PathBuf {
        match path.strip_prefix('~') {
            Some(rest) => self.root.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }

    /// Runs a synchronous step to completion, publishing step events.
    ///
    /// `fallback_timeout` applies when the step block declares none (the
    /// machine passes the shutdown grace for `shutdown` steps).
    pub async fn run_sync(
        &self,
        component: &Component,
        step: &str,
        fallback_timeout: Option<Duration>,
    ) -> Result<StepRun, StepError> {
        let (cmd, timeout) = match self.resolve_step(component, step).await {
            Ok(ResolvedStep::Nothing) => return Ok(StepRun::NothingDone),
            Ok(ResolvedStep::Skipped) => {
                self.bus.publish(
                    Event::now(EventKind::StepSkipped)
                        .with_component(component.name())
                        .with_step(step),
                );
                return Ok(StepRun::Skipped);
            }
            Ok(ResolvedStep::Command { cmd, timeout }) => (cmd, timeout),
            Err(e) => {
                self.publish_failed(component, step, &e);
                return Err(e);
            }
        };

        self.bus.publish(
            Event::now(EventKind::StepStarting)
                .with_component(component.name())
                .with_step(step),
        );
        component.set_status(Some(cmd.clone()));
        let res = self
            .shell
            .run(
                component.name(),
                step,
                &cmd,
                &component.setenv(),
                timeout.or(fallback_timeout).or(self.default_timeout),
            )
            .await;
        component.set_status(None);

        match res {
            Ok(()) => Ok(StepRun::Done),
            Err(e) => {
                self.publish_failed(component, step, &e);
                Err(e)
            }
        }
    }

    fn publish_failed(&self, component: &Component, step: &str, err: &StepError) {
        let exit = match err {
            StepError::NonZeroExit { code, .. } => *code,
            _ => None,
        };
        self.bus.publish(
            Event::now(EventKind::StepFailed)
                .with_component(component.name())
                .with_step(step)
                .with_exit(exit)
                .with_reason(err.to_string()),
        );
    }
}
