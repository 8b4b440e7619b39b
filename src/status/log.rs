//! # Logging status sink.
//!
//! [`LogSink`] reports transitions and health flips through `tracing` in a
//! compact human-readable form. Useful as a default sink for development
//! and demos; production deployments typically add their own
//! [`StatusSink`](crate::status::StatusSink) (MQTT publisher, fleet API).
//!
//! ## Output shape
//! ```text
//! INFO transition component=sleeperB from=Starting to=Running
//! WARN transition component=camera from=Running to=Errored reason="run exited with Some(1)"
//! INFO overall health=Healthy
//! ```

use async_trait::async_trait;
use tracing::{info, warn};

use crate::state::{Overall, State};

use super::sink::{StatusSink, Transition};

/// `tracing`-backed status sink.
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn on_transition(&self, t: &Transition) {
        match t.to {
            State::Errored | State::Broken => warn!(
                component = %t.component,
                from = %t.from,
                to = %t.to,
                reason = t.reason.as_deref().unwrap_or(""),
                "transition"
            ),
            _ => info!(
                component = %t.component,
                from = %t.from,
                to = %t.to,
                "transition"
            ),
        }
    }

    async fn on_overall_change(&self, overall: Overall) {
        info!(health = %overall, "overall");
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
