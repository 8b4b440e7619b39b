//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the scheduler, registry,
//! lifecycle machines and status sinks.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: lifecycle machines (transitions, step events), the
//!   scheduler (start/stop/stuck), the registry (locate failures), the
//!   overall tracker (health flips).
//! - **Consumers**: the scheduler (reacts to transitions), the status
//!   bridge (fans out to [`StatusSink`](crate::status::StatusSink)s).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
