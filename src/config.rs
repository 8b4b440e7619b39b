//! # Global runtime configuration.
//!
//! [`Config`] defines the supervisor's behavior: shutdown grace period,
//! event bus capacity, stuck-detection window, default step timeout, and
//! the root directory used for `~` expansion in `exists` guards.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use edgevisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.grace = Duration::from_secs(20);
//! cfg.stuck_after = Duration::from_secs(60);
//!
//! assert_eq!(cfg.grace, Duration::from_secs(20));
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Global configuration for the runtime and scheduler.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time a stopping component's `run` child gets between the
    /// terminate and kill signals, and the overall graceful-shutdown bound.
    /// Overridable per component via `lifecycle.shutdown.timeout`.
    pub grace: Duration,
    /// Capacity of the event bus channel.
    pub bus_capacity: usize,
    /// How long the scheduler waits without any state change before
    /// emitting a `Stuck` diagnostic naming the blocking edge.
    pub stuck_after: Duration,
    /// Default timeout applied to synchronous steps (`install`, `startup`,
    /// `shutdown`, `recover`) when the step block declares none.
    /// `None` = no timeout.
    pub step_timeout: Option<Duration>,
    /// Root directory for `~` expansion in `exists` skip guards.
    pub root: PathBuf,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `grace = 10s`
    /// - `bus_capacity = 1024`
    /// - `stuck_after = 30s`
    /// - `step_timeout = None`
    /// - `root` = the process working directory (falling back to `.`)
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            bus_capacity: 1024,
            stuck_after: Duration::from_secs(30),
            step_timeout: None,
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}
