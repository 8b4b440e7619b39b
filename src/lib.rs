//! # edgevisor
//!
//! **Edgevisor** is a local supervisor for edge-device components: it
//! installs, starts, stops, and monitors interdependent services and
//! one-shot scripts described by declarative recipes.
//!
//! ## Features
//!
//! | Area                  | Description                                                        | Key types / traits                        |
//! |-----------------------|--------------------------------------------------------------------|-------------------------------------------|
//! | **Lifecycle**         | Per-component state machine with install/startup/run/shutdown.     | [`State`]                                 |
//! | **Dependencies**      | Bottom-up startup, top-down shutdown, cycle rejection.             | [`DependencyGraph`], [`DepEdge`]          |
//! | **Recipes**           | Declarative component descriptions, semver matching.               | [`Recipe`], [`RecipeSource`]              |
//! | **Platform**          | Ranked host tags select platform-specific lifecycle blocks.        | [`TagRanks`]                              |
//! | **Configuration**     | Hierarchical store with COW snapshots and change notification.     | [`ConfigStore`], [`Topics`]               |
//! | **Code-backed units** | In-process handlers registered by symbol, singleton support.       | [`Handler`], [`HandlerRegistry`]          |
//! | **Status**            | Transition and health reporting to pluggable sinks.                | [`StatusSink`], [`Overall`], [`LogSink`]  |
//! | **Errors**            | Typed errors with process exit-code mapping.                       | [`RuntimeError`], [`StepError`]           |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use edgevisor::{Config, LogSink, MemoryRecipeSource, Orchestrator, Recipe, Tree};
//! use semver::Version;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), edgevisor::RuntimeError> {
//!     let recipes = Arc::new(MemoryRecipeSource::new());
//!     recipes.add(
//!         Recipe::new("sleeperB", Version::new(1, 0, 0))
//!             .with_lifecycle(Tree::branch([("run", Tree::leaf("sleep 5"))])),
//!     );
//!     recipes.add(
//!         Recipe::new("main", Version::new(1, 0, 0))
//!             .with_lifecycle(Tree::branch([("run", Tree::leaf("sleep 5"))]))
//!             .with_dependencies("sleeperB"),
//!     );
//!
//!     let orchestrator = Orchestrator::builder(Config::default())
//!         .recipes(recipes)
//!         .sink(Arc::new(LogSink))
//!         .build();
//!
//!     // Runs until SIGINT/SIGTERM, then tears down in reverse order.
//!     orchestrator.run(["main"]).await
//! }
//! ```

mod config;
mod error;
mod graph;
mod platform;
mod recipes;
mod shell;
mod state;
mod timer;

mod components;
mod core;
mod events;
mod status;
mod store;

// ---- Public re-exports ----

pub use config::Config;
pub use crate::core::{ComponentRegistry, Orchestrator, OrchestratorBuilder};
pub use error::{RuntimeError, StepError};
pub use events::{Bus, Event, EventKind};
pub use graph::{CycleError, DepEdge, DependencyGraph};
pub use platform::TagRanks;
pub use recipes::{MemoryRecipeSource, Recipe, RecipeSource};
pub use shell::ShellRunner;
pub use state::{Overall, State};
pub use status::{LogSink, OverallTracker, StatusSink, Transition};
pub use store::{ConfigStore, Node, Topic, Topics, Tree, Value};
pub use timer::Periodicity;

pub use components::{
    parse_dependencies, Component, ComponentRef, DepSyntaxError, Handler, HandlerFactory,
    HandlerRegistry, Kind,
};
