//! Hierarchical configuration store.
//!
//! The only process-wide mutable state in the runtime: a tree of
//! [`Topics`]/[`Topic`] nodes with copy-on-write child snapshots and
//! change notification. See [`topics`] for the concurrency rules.

mod topics;

pub use topics::{ConfigChange, ConfigStore, Node, Topic, Topics, Tree, Value};
