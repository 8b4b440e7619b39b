//! # SinkSet: non-blocking fan-out over multiple status sinks.
//!
//! [`SinkSet`] distributes transitions and overall-health flips to every
//! registered [`StatusSink`] **without awaiting** their processing.
//!
//! ## What it guarantees
//! - `emit` returns immediately.
//! - Per-sink FIFO (queue order).
//! - Panics inside sinks are caught and logged (isolation).
//!
//! ## What it does **not** guarantee
//! - No global ordering across different sinks.
//! - No retries on per-sink queue overflow (messages are dropped for that
//!   sink and an overflow event is published).

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::events::{Bus, Event};
use crate::state::Overall;

use super::sink::{StatusSink, Transition};

/// One message fanned out to sinks.
#[derive(Debug, Clone)]
pub(crate) enum SinkMsg {
    Transition(Transition),
    Overall(Overall),
}

/// Per-sink channel with metadata.
struct SinkChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<SinkMsg>>,
}

/// Composite fan-out with per-sink bounded queues and worker tasks.
pub struct SinkSet {
    channels: Vec<SinkChannel>,
    #[allow(dead_code)]
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SinkSet {
    /// Creates a new set and spawns one worker per sink.
    pub(crate) fn new(sinks: Vec<Arc<dyn StatusSink>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(sinks.len());
        let mut workers = Vec::with_capacity(sinks.len());

        for sink in sinks {
            let cap = sink.queue_capacity().max(1);
            let name = sink.name();
            let (tx, mut rx) = mpsc::channel::<Arc<SinkMsg>>(cap);
            let s = Arc::clone(&sink);
            let worker_bus = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    let fut = async {
                        match msg.as_ref() {
                            SinkMsg::Transition(t) => s.on_transition(t).await,
                            SinkMsg::Overall(o) => s.on_overall_change(*o).await,
                        }
                    };
                    if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        warn!(sink = %s.name(), "status sink panicked: {panic:?}");
                        worker_bus.publish(Event::sink_panicked(s.name(), format!("{panic:?}")));
                    }
                }
            });

            channels.push(SinkChannel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Fan-out one message to all sinks (non-blocking).
    ///
    /// If a sink's queue is **full** or **closed**, the message is dropped
    /// for it and an overflow event is published.
    pub(crate) fn emit(&self, msg: SinkMsg) {
        let msg = Arc::new(msg);
        for channel in &self.channels {
            match channel.sender.try_send(Arc::clone(&msg)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.bus
                        .publish(Event::sink_overflow(channel.name, "queue_full"));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.bus
                        .publish(Event::sink_overflow(channel.name, "worker_closed"));
                }
            }
        }
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the set has no sinks.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        transitions: Arc<AtomicUsize>,
        overalls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl StatusSink for Counting {
        async fn on_transition(&self, _t: &Transition) {
            self.transitions.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_overall_change(&self, _o: Overall) {
            self.overalls.fetch_add(1, Ordering::SeqCst);
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn fan_out_reaches_every_sink() {
        let transitions = Arc::new(AtomicUsize::new(0));
        let overalls = Arc::new(AtomicUsize::new(0));
        let set = SinkSet::new(
            vec![Arc::new(Counting {
                transitions: transitions.clone(),
                overalls: overalls.clone(),
            })],
            Bus::new(16),
        );

        set.emit(SinkMsg::Transition(Transition {
            seq: 1,
            component: "a".to_string(),
            from: State::New,
            to: State::Installing,
            reason: None,
        }));
        set.emit(SinkMsg::Overall(Overall::Healthy));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
        assert_eq!(overalls.load(Ordering::SeqCst), 1);
    }
}
