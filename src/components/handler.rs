//! # Code-backed component handlers.
//!
//! A recipe that declares `class = <symbol>` is driven by an in-process
//! [`Handler`] instead of shell scripts. Handlers are registered in a
//! process-wide [`HandlerRegistry`] as constructors keyed by symbol; each
//! constructor consumes the component's configuration subtree.
//!
//! ## Singletons
//! A handler registered with `singleton = true` is constructed once; every
//! later instantiation under the same symbol returns the same instance.
//!
//! ## Implementors map
//! Besides explicit `class` declarations, the registry keeps a
//! `component name → symbol` map ([`HandlerRegistry::register_implementor`])
//! so deployments can bind code-backed handlers to names without touching
//! recipes.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use edgevisor::{Handler, HandlerRegistry};
//!
//! struct Beacon;
//! impl Handler for Beacon {}
//!
//! let registry = HandlerRegistry::new();
//! registry.register("beacon", true, |_config| Ok(Arc::new(Beacon)));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StepError;
use crate::store::Topics;

/// In-process lifecycle implementation for a code-backed component.
///
/// Every method has a succeed-by-default implementation, so a handler only
/// overrides the steps it cares about. `run` receives a cancellation token
/// and should return when it is cancelled; its result plays the role of the
/// `run` child's exit code.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Install step.
    async fn install(&self) -> Result<(), StepError> {
        Ok(())
    }

    /// Startup step.
    async fn startup(&self) -> Result<(), StepError> {
        Ok(())
    }

    /// Long-running work; cancelled on shutdown.
    async fn run(&self, ctx: CancellationToken) -> Result<(), StepError> {
        let _ = ctx;
        Ok(())
    }

    /// Shutdown step.
    async fn shutdown(&self) -> Result<(), StepError> {
        Ok(())
    }
}

/// Constructor for a handler: consumes the component's config subtree.
pub type HandlerFactory =
    Arc<dyn Fn(Topics) -> Result<Arc<dyn Handler>, StepError> + Send + Sync>;

struct HandlerEntry {
    factory: HandlerFactory,
    singleton: bool,
}

/// Process-wide table of handler constructors and the name → symbol
/// implementors map.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<HashMap<String, HandlerEntry>>,
    implementors: RwLock<HashMap<String, String>>,
    singletons: Mutex<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under `symbol`.
    pub fn register<F>(&self, symbol: impl Into<String>, singleton: bool, factory: F)
    where
        F: Fn(Topics) -> Result<Arc<dyn Handler>, StepError> + Send + Sync + 'static,
    {
        self.entries.write().expect("handler lock poisoned").insert(
            symbol.into(),
            HandlerEntry {
                factory: Arc::new(factory),
                singleton,
            },
        );
    }

    /// Binds a component name to a handler symbol.
    pub fn register_implementor(&self, name: impl Into<String>, symbol: impl Into<String>) {
        self.implementors
            .write()
            .expect("handler lock poisoned")
            .insert(name.into(), symbol.into());
    }

    /// Symbol bound to `name` through the implementors map, if any.
    pub fn implementor_for(&self, name: &str) -> Option<String> {
        self.implementors
            .read()
            .expect("handler lock poisoned")
            .get(name)
            .cloned()
    }

    /// Whether `symbol` has a registered constructor.
    pub fn contains(&self, symbol: &str) -> bool {
        self.entries
            .read()
            .expect("handler lock poisoned")
            .contains_key(symbol)
    }

    /// Instantiates the handler registered under `symbol`.
    ///
    /// Returns `None` for an unknown symbol. Singleton entries construct at
    /// most once and return the cached instance afterwards.
    pub fn instantiate(
        &self,
        symbol: &str,
        config: Topics,
    ) -> Option<Result<Arc<dyn Handler>, StepError>> {
        let (factory, singleton) = {
            let entries = self.entries.read().expect("handler lock poisoned");
            let entry = entries.get(symbol)?;
            (entry.factory.clone(), entry.singleton)
        };

        if singleton {
            let mut cache = self.singletons.lock().expect("handler lock poisoned");
            if let Some(existing) = cache.get(symbol) {
                return Some(Ok(existing.clone()));
            }
            return Some(match factory(config) {
                Ok(h) => {
                    cache.insert(symbol.to_string(), h.clone());
                    Ok(h)
                }
                Err(e) => Err(e),
            });
        }

        Some(factory(config))
    }
}
