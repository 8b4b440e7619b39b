//! # Error types used by the edgevisor runtime and lifecycle steps.
//!
//! This module defines two main error enums:
//!
//! - [`RuntimeError`] errors raised by the orchestration runtime itself.
//! - [`StepError`] errors raised by individual lifecycle step executions.
//!
//! Both types provide `as_label` helpers for logs and metrics.
//! [`StepError`] additionally exposes `is_retryable()`; [`RuntimeError`]
//! exposes the process exit-code mapping used at the binary boundary.

use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the edgevisor runtime.
///
/// These represent failures in the orchestration system itself, not in any
/// single lifecycle step.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some components remained active
    /// and had to be force-terminated.
    #[error("shutdown grace {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Components that did not reach a quiescent state in time.
        stuck: Vec<String>,
    },

    /// Dependency resolution failed at startup (cycle, unresolvable root).
    #[error("resolution failed for '{name}': {reason}")]
    ResolutionFailed { name: String, reason: String },

    /// A configuration subtree is structurally invalid.
    #[error("invalid configuration at '{path}': {reason}")]
    ConfigInvalid { path: String, reason: String },

    /// The scheduler's command channel is gone; the runtime has shut down.
    #[error("runtime is closed")]
    Closed,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::ResolutionFailed { .. } => "runtime_resolution_failed",
            RuntimeError::ConfigInvalid { .. } => "runtime_config_invalid",
            RuntimeError::Closed => "runtime_closed",
        }
    }

    /// Exit code for the process boundary: 1 for unrecoverable configuration
    /// errors, 2 for dependency resolution failures at startup.
    ///
    /// A clean shutdown (no error) is 0; `GraceExceeded` still counts as a
    /// clean shutdown at the process level.
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::GraceExceeded { .. } => 0,
            RuntimeError::ConfigInvalid { .. } => 1,
            RuntimeError::ResolutionFailed { .. } => 2,
            RuntimeError::Closed => 0,
        }
    }
}

/// # Errors produced by lifecycle step execution.
///
/// Raised while resolving, guarding, or running a single `install` /
/// `startup` / `run` / `shutdown` / `recover` step. Script failures and
/// timeouts are retryable (the machine retries `install` and `startup`
/// once); structural errors are not.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StepError {
    /// The child process exited with a non-zero status.
    #[error("step '{step}' exited with {code:?}")]
    NonZeroExit { step: String, code: Option<i32> },

    /// The step exceeded its configured timeout.
    #[error("step '{step}' timed out after {timeout:?}")]
    Timeout { step: String, timeout: Duration },

    /// The child process could not be spawned at all.
    #[error("step '{step}' failed to spawn: {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    /// A structured step block is missing its `script` child.
    #[error("missing script for '{step}'")]
    MissingScript { step: String },

    /// A `skipif`/`doif` guard could not be evaluated.
    #[error("bad skip guard on '{step}': {reason}")]
    Guard { step: String, reason: String },

    /// A code-backed handler returned an error.
    #[error("handler failed in '{step}': {reason}")]
    Handler { step: String, reason: String },
}

impl StepError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            StepError::NonZeroExit { .. } => "step_non_zero_exit",
            StepError::Timeout { .. } => "step_timeout",
            StepError::Spawn { .. } => "step_spawn",
            StepError::MissingScript { .. } => "step_missing_script",
            StepError::Guard { .. } => "step_guard",
            StepError::Handler { .. } => "step_handler",
        }
    }

    /// Whether the machine may retry the step (non-zero exits and timeouts
    /// are transient; structural errors are not).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StepError::NonZeroExit { .. } | StepError::Timeout { .. } | StepError::Handler { .. }
        )
    }
}
