//! # Hierarchical configuration tree.
//!
//! The configuration store is a tree of [`Topics`] (interior nodes) and
//! [`Topic`] leaves addressed by `.`-separated paths. Component
//! configuration lives under `services.<name>`; a component's lifecycle
//! block is the `lifecycle` subtree of its config.
//!
//! ## Concurrency model
//! Each interior node keeps its children in an `Arc<IndexMap>` snapshot
//! behind a short write lock. Readers clone the `Arc` and iterate without
//! holding any lock; writers clone the map, mutate the copy, and swap the
//! `Arc`. Observers therefore never see a torn read. Child order is
//! insertion order, which is what breaks ties in platform-tag selection.
//!
//! ## Change notification
//! Every value write publishes the full path of the changed leaf on a
//! broadcast channel obtained from [`ConfigStore::watch`]. Consumers filter
//! by path prefix.
//!
//! ## Example
//! ```
//! use edgevisor::ConfigStore;
//!
//! let store = ConfigStore::new();
//! let svc = store.lookup_topics("services.echo");
//! svc.set("class", "echo-handler");
//! svc.subtopics("lifecycle").set("run", "echo hello");
//!
//! let node = store.find("services.echo.lifecycle.run").unwrap();
//! assert_eq!(node.as_leaf().unwrap().value.to_text(), "echo hello");
//! ```

use std::sync::{Arc, RwLock};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::broadcast;

/// A configuration value.
///
/// Values are kept loosely typed and coerced at the point of use, the way
/// recipe files mix strings, numbers and booleans freely.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Value {
    /// String rendering of the value (used for shell commands and env).
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
        }
    }

    /// Boolean coercion: `true`/`false` strings included.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Str(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Value::Int(i) => Some(*i != 0),
            Value::Float(_) => None,
        }
    }

    /// Numeric coercion.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(_) => None,
        }
    }

    /// Duration coercion: bare numbers are seconds, strings may use
    /// humantime forms (`250ms`, `2m 3s`).
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Value::Int(i) if *i >= 0 => Some(Duration::from_secs(*i as u64)),
            Value::Float(f) if *f >= 0.0 => Some(Duration::from_secs_f64(*f)),
            Value::Str(s) => {
                let s = s.trim();
                if let Ok(secs) = s.parse::<f64>() {
                    return (secs >= 0.0).then(|| Duration::from_secs_f64(secs));
                }
                humantime::parse_duration(s).ok()
            }
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

/// Leaf node: a single configuration value with its full path.
#[derive(Debug, Clone)]
pub struct Topic {
    /// Full dotted path of this leaf.
    pub path: String,
    /// The value.
    pub value: Value,
}

/// A node in the tree: either a leaf [`Topic`] or an interior [`Topics`].
#[derive(Clone)]
pub enum Node {
    Leaf(Topic),
    Branch(Topics),
}

impl Node {
    /// Leaf accessor.
    pub fn as_leaf(&self) -> Option<&Topic> {
        match self {
            Node::Leaf(t) => Some(t),
            Node::Branch(_) => None,
        }
    }

    /// Branch accessor.
    pub fn as_branch(&self) -> Option<&Topics> {
        match self {
            Node::Branch(t) => Some(t),
            Node::Leaf(_) => None,
        }
    }
}

struct TopicsInner {
    path: String,
    children: RwLock<Arc<IndexMap<String, Node>>>,
    notify: broadcast::Sender<ConfigChange>,
}

/// Interior node of the configuration tree.
///
/// Cheap to clone; clones share the same subtree.
#[derive(Clone)]
pub struct Topics {
    inner: Arc<TopicsInner>,
}

impl Topics {
    fn new(path: String, notify: broadcast::Sender<ConfigChange>) -> Self {
        Self {
            inner: Arc::new(TopicsInner {
                path,
                children: RwLock::new(Arc::new(IndexMap::new())),
                notify,
            }),
        }
    }

    /// Full dotted path of this subtree (empty for the root).
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.inner.path.rsplit('.').next().unwrap_or("")
    }

    fn join(&self, key: &str) -> String {
        if self.inner.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.inner.path)
        }
    }

    /// Immutable snapshot of the children, in insertion order.
    pub fn children(&self) -> Arc<IndexMap<String, Node>> {
        self.inner.children.read().expect("config lock poisoned").clone()
    }

    /// Whether this subtree has no children.
    pub fn is_empty(&self) -> bool {
        self.children().is_empty()
    }

    /// Direct child by key.
    pub fn get_child(&self, key: &str) -> Option<Node> {
        self.children().get(key).cloned()
    }

    /// Descends a relative dotted path without creating anything.
    pub fn find(&self, path: &str) -> Option<Node> {
        let mut node = Node::Branch(self.clone());
        for seg in path.split('.') {
            match node {
                Node::Branch(t) => node = t.get_child(seg)?,
                Node::Leaf(_) => return None,
            }
        }
        Some(node)
    }

    /// Returns the interior child `key`, creating it if absent.
    ///
    /// An existing leaf under the same key is replaced.
    pub fn subtopics(&self, key: &str) -> Topics {
        if let Some(Node::Branch(t)) = self.get_child(key) {
            return t;
        }
        let created = Topics::new(self.join(key), self.inner.notify.clone());
        let mut guard = self.inner.children.write().expect("config lock poisoned");
        // Re-check under the lock; another writer may have created it.
        if let Some(Node::Branch(t)) = guard.get(key) {
            return t.clone();
        }
        let mut next = (**guard).clone();
        next.insert(key.to_string(), Node::Branch(created.clone()));
        *guard = Arc::new(next);
        created
    }

    /// Writes a leaf value under `key` and notifies watchers.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let path = self.join(key);
        let leaf = Topic {
            path: path.clone(),
            value: value.into(),
        };
        {
            let mut guard = self.inner.children.write().expect("config lock poisoned");
            let mut next = (**guard).clone();
            next.insert(key.to_string(), Node::Leaf(leaf));
            *guard = Arc::new(next);
        }
        let _ = self.inner.notify.send(ConfigChange { path });
    }

    /// Collects the direct leaf children as `(key, text)` pairs, in
    /// insertion order. Used for `setenv` blocks.
    pub fn leaf_pairs(&self) -> Vec<(String, String)> {
        self.children()
            .iter()
            .filter_map(|(k, n)| {
                n.as_leaf()
                    .map(|t| (k.clone(), t.value.to_text()))
            })
            .collect()
    }

    /// Merges a [`Tree`] into this subtree, overwriting existing keys.
    pub fn merge_tree(&self, tree: &Tree) {
        if let Tree::Branch(children) = tree {
            for (key, sub) in children {
                match sub {
                    Tree::Leaf(v) => self.set(key, v.clone()),
                    Tree::Branch(_) => self.subtopics(key).merge_tree(sub),
                }
            }
        }
    }
}

/// Detached value tree used to describe configuration before it is
/// imported into a store (recipes carry these).
#[derive(Debug, Clone)]
pub enum Tree {
    Leaf(Value),
    Branch(IndexMap<String, Tree>),
}

impl Tree {
    /// Leaf constructor.
    pub fn leaf(value: impl Into<Value>) -> Tree {
        Tree::Leaf(value.into())
    }

    /// Branch constructor from `(key, subtree)` pairs; insertion order is
    /// preserved.
    pub fn branch<I, S>(children: I) -> Tree
    where
        I: IntoIterator<Item = (S, Tree)>,
        S: Into<String>,
    {
        Tree::Branch(children.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<&str> for Tree {
    fn from(s: &str) -> Self {
        Tree::Leaf(Value::from(s))
    }
}

/// Notification of a changed configuration leaf.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// Full dotted path of the written leaf.
    pub path: String,
}

/// Process-wide configuration store: the tree root plus the change
/// broadcast channel.
#[derive(Clone)]
pub struct ConfigStore {
    root: Topics,
    notify: broadcast::Sender<ConfigChange>,
}

impl ConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (notify, _rx) = broadcast::channel(256);
        Self {
            root: Topics::new(String::new(), notify.clone()),
            notify,
        }
    }

    /// The root subtree.
    pub fn root(&self) -> &Topics {
        &self.root
    }

    /// Returns the interior node at `path`, creating missing segments.
    pub fn lookup_topics(&self, path: &str) -> Topics {
        let mut cur = self.root.clone();
        for seg in path.split('.').filter(|s| !s.is_empty()) {
            cur = cur.subtopics(seg);
        }
        cur
    }

    /// Finds the node at `path` without creating anything.
    pub fn find(&self, path: &str) -> Option<Node> {
        self.root.find(path)
    }

    /// Subscribes to change notifications for the whole tree.
    pub fn watch(&self) -> broadcast::Receiver<ConfigChange> {
        self.notify.subscribe()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}
