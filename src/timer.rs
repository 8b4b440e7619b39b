//! # Periodicity: per-component re-execution timer.
//!
//! A recipe that declares `lifecycle.timer.period` (a duration) gets a
//! [`Periodicity`] attached to its component. The timer drives one-shot
//! `Finished → Running → Finished` cycles: each time the owner parks in
//! `Finished`, the machine arms the timer, and when it fires the owner's
//! `run` step is executed again.
//!
//! ## Rules
//! - The delay is `period × (1 ± rand·fuzz)` with `fuzz ∈ [0, 1]`
//!   (`lifecycle.timer.fuzz`, default 0). The fuzz spreads fleet-wide
//!   periodic work so devices do not fire in lockstep.
//! - Timers are **single-shot re-armed**: one pending fire at most, armed
//!   again only when the owner returns to `Finished`.
//! - Overlapping fires are coalesced by the machine: a fire that arrives
//!   while the owner is still `Running` is dropped.
//! - [`Periodicity::shutdown`] disarms synchronously; no further fires are
//!   delivered after it returns.

use std::time::Duration;

use rand::Rng;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::store::Topics;

/// Periodic re-execution timer for one component.
#[derive(Debug)]
pub struct Periodicity {
    period: Duration,
    fuzz: f64,
    cancel: CancellationToken,
}

impl Periodicity {
    /// Builds a timer from a component's `lifecycle` subtree.
    ///
    /// Returns `Ok(None)` when no `timer` block is declared. A `timer`
    /// block without a parseable `period` is a configuration error.
    pub fn from_lifecycle(lifecycle: &Topics) -> Result<Option<Self>, RuntimeError> {
        let Some(block) = lifecycle.get_child("timer").and_then(|n| n.as_branch().cloned()) else {
            return Ok(None);
        };
        let period = block
            .get_child("period")
            .and_then(|n| n.as_leaf().and_then(|t| t.value.as_duration()))
            .ok_or_else(|| RuntimeError::ConfigInvalid {
                path: format!("{}.period", block.path()),
                reason: "timer requires a duration period".to_string(),
            })?;
        let fuzz = block
            .get_child("fuzz")
            .and_then(|n| n.as_leaf().and_then(|t| t.value.as_f64()))
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        Ok(Some(Self {
            period,
            fuzz,
            cancel: CancellationToken::new(),
        }))
    }

    /// Direct constructor for tests and code-backed components.
    pub fn new(period: Duration, fuzz: f64) -> Self {
        Self {
            period,
            fuzz: fuzz.clamp(0.0, 1.0),
            cancel: CancellationToken::new(),
        }
    }

    /// The configured base period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Next delay: `period × (1 ± rand·fuzz)`.
    fn delay(&self) -> Duration {
        if self.fuzz == 0.0 {
            return self.period;
        }
        let swing = rand::thread_rng().gen_range(-self.fuzz..=self.fuzz);
        self.period.mul_f64((1.0 + swing).max(0.0))
    }

    /// Arms one fire. `fire` runs after the fuzzed delay unless the timer
    /// is shut down first.
    ///
    /// The machine re-arms on each return to `Finished`; arming twice
    /// without a fire in between simply schedules two pending sleeps, so
    /// callers must not do that.
    pub fn arm(&self, fire: impl FnOnce() + Send + 'static) {
        let delay = self.delay();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => fire(),
                _ = cancel.cancelled() => {}
            }
        });
    }

    /// Disarms the timer. Pending fires are dropped; later [`Periodicity::arm`]
    /// calls are no-ops.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConfigStore;

    #[tokio::test(start_paused = true)]
    async fn fires_after_period() {
        let timer = Periodicity::new(Duration::from_secs(2), 0.0);
        let (tx, rx) = tokio::sync::oneshot::channel();
        timer.arm(move || {
            let _ = tx.send(());
        });
        time::advance(Duration::from_secs(3)).await;
        rx.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_pending_fire() {
        let timer = Periodicity::new(Duration::from_secs(2), 0.0);
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
        timer.arm(move || {
            let _ = tx.try_send(());
        });
        timer.shutdown();
        time::advance(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn parses_lifecycle_timer_block() {
        let store = ConfigStore::new();
        let lc = store.lookup_topics("services.beacon.lifecycle");
        let timer = lc.subtopics("timer");
        timer.set("period", "30s");
        timer.set("fuzz", 0.5);

        let p = Periodicity::from_lifecycle(&lc).unwrap().unwrap();
        assert_eq!(p.period(), Duration::from_secs(30));
    }

    #[test]
    fn missing_block_is_none_and_bad_period_is_an_error() {
        let store = ConfigStore::new();
        let lc = store.lookup_topics("services.plain.lifecycle");
        assert!(Periodicity::from_lifecycle(&lc).unwrap().is_none());

        lc.subtopics("timer").set("period", "often");
        assert!(Periodicity::from_lifecycle(&lc).is_err());
    }

    #[test]
    fn fuzz_bounds_the_delay() {
        let timer = Periodicity::new(Duration::from_secs(10), 0.2);
        for _ in 0..100 {
            let d = timer.delay();
            assert!(d >= Duration::from_secs(8) && d <= Duration::from_secs(12));
        }
    }
}
