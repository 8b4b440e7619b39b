//! # Shell runner: child processes for lifecycle steps.
//!
//! [`ShellRunner`] launches and supervises the child processes behind
//! lifecycle steps. Commands run via the host shell (`sh -c` on POSIX,
//! `cmd /c` on Windows) with the full parent environment plus any recipe
//! `setenv` entries.
//!
//! - **Synchronous steps** (`install`, `startup`, `shutdown`, `recover`)
//!   block until the child exits; non-zero exit or timeout is a
//!   [`StepError`].
//! - **The `run` step** is launched in the background via
//!   [`ShellRunner::run_background`]; the child's exit code is delivered to
//!   a completion callback, which the lifecycle machine turns into a state
//!   transition.
//!
//! Child stdout/stderr are streamed line-by-line to the log, tagged with
//! the owning component and step name.
//!
//! ## Termination
//! Stopping a background child escalates: SIGTERM, wait up to the grace
//! period, then SIGKILL. On Windows the first signal is already the kill.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StepError;

/// Launches and supervises lifecycle step children.
#[derive(Clone, Debug)]
pub struct ShellRunner {
    /// Grace between terminate and kill when stopping a background child.
    grace: Duration,
}

/// Handle to a background `run` child.
///
/// Dropping the handle does not stop the child; call [`RunningChild::stop`].
pub struct RunningChild {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl RunningChild {
    /// Requests termination (terminate → grace → kill) and waits for the
    /// supervising task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }
}

impl ShellRunner {
    /// Creates a runner with the given terminate-to-kill grace.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Builds the host-shell command for `cmd` with `env` on top of the
    /// inherited environment.
    fn command(cmd: &str, env: &[(String, String)]) -> Command {
        let mut c = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/c").arg(cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(cmd);
            c
        };
        c.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        c.stdin(Stdio::null());
        c.stdout(Stdio::piped());
        c.stderr(Stdio::piped());
        c.kill_on_drop(true);
        c
    }

    /// Spawns `cmd` and streams its output to the log.
    fn spawn(owner: &str, step: &str, cmd: &str, env: &[(String, String)]) -> Result<Child, StepError> {
        debug!(component = %owner, step = %step, command = %cmd, "spawning step");
        let mut child = Self::command(cmd, env).spawn().map_err(|source| StepError::Spawn {
            step: step.to_string(),
            source,
        })?;
        if let Some(out) = child.stdout.take() {
            stream_lines(out, owner.to_string(), step.to_string(), false);
        }
        if let Some(err) = child.stderr.take() {
            stream_lines(err, owner.to_string(), step.to_string(), true);
        }
        Ok(child)
    }

    /// Runs a synchronous step to completion.
    ///
    /// Returns `Ok(())` iff the child exits 0. A timeout kills the child
    /// and reports [`StepError::Timeout`].
    pub async fn run(
        &self,
        owner: &str,
        step: &str,
        cmd: &str,
        env: &[(String, String)],
        step_timeout: Option<Duration>,
    ) -> Result<(), StepError> {
        let mut child = Self::spawn(owner, step, cmd, env)?;

        let status = match step_timeout {
            Some(dur) => match timeout(dur, child.wait()).await {
                Ok(res) => res,
                Err(_elapsed) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(StepError::Timeout {
                        step: step.to_string(),
                        timeout: dur,
                    });
                }
            },
            None => child.wait().await,
        }
        .map_err(|source| StepError::Spawn {
            step: step.to_string(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(StepError::NonZeroExit {
                step: step.to_string(),
                code: status.code(),
            })
        }
    }

    /// Spawns a background child and returns as soon as it is running.
    ///
    /// `on_exit` is invoked with the exit code when the child terminates on
    /// its own. If the child is stopped through [`RunningChild::stop`], the
    /// callback is **not** invoked: the stop flow owns the state change.
    pub fn run_background(
        &self,
        owner: &str,
        step: &str,
        cmd: &str,
        env: &[(String, String)],
        on_exit: impl FnOnce(Option<i32>) + Send + 'static,
    ) -> Result<RunningChild, StepError> {
        let mut child = Self::spawn(owner, step, cmd, env)?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let grace = self.grace;
        let owner = owner.to_string();

        let join = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    debug!(component = %owner, code = ?code, "run child exited");
                    on_exit(code);
                }
                _ = token.cancelled() => {
                    terminate(&mut child);
                    if timeout(grace, child.wait()).await.is_err() {
                        warn!(component = %owner, grace = ?grace, "run child ignored terminate; killing");
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
            }
        });

        Ok(RunningChild { cancel, join })
    }

    /// Searches `PATH` for `cmd`; absolute path or `None`.
    pub fn which(cmd: &str) -> Option<PathBuf> {
        which::which(cmd).ok()
    }

    /// Runs `expr` through the shell; true iff it exits 0 **and** writes
    /// nothing to standard error. Used by shell-expression skip guards.
    pub async fn successful(&self, expr: &str) -> bool {
        let out = if cfg!(windows) {
            Command::new("cmd").arg("/c").arg(expr).output().await
        } else {
            Command::new("sh").arg("-c").arg(expr).output().await
        };
        match out {
            Ok(out) => out.status.success() && out.stderr.is_empty(),
            Err(_) => false,
        }
    }
}

/// Sends the polite termination signal; on Windows this is already the kill.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
            return;
        }
    }
    let _ = child.start_kill();
}

/// Streams one output pipe to the log, a line at a time.
fn stream_lines(
    pipe: impl AsyncRead + Unpin + Send + 'static,
    owner: String,
    step: String,
    is_err: bool,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_err {
                warn!(component = %owner, step = %step, "{line}");
            } else {
                info!(component = %owner, step = %step, "{line}");
            }
        }
    });
}
