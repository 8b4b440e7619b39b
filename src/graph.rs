//! # Dependency graph.
//!
//! Directed edges `(from, to, required_state)` meaning "*from* cannot reach
//! `Running` until *to* is at least *required_state*". The graph is a DAG
//! by construction; cycles are rejected at ordering time and the
//! last-touched node of the cycle is reported so the scheduler can mark it
//! `Errored`.
//!
//! ## Storage
//! Adjacency lists are kept as `Arc<Vec<DepEdge>>` snapshots swapped under
//! a short write lock: mutation happens only while a component's
//! declaration is (re)resolved, while iteration happens on every scheduler
//! tick, so readers clone the `Arc` and never hold a lock.
//!
//! ## Ordering
//! [`DependencyGraph::topo_order`] produces a leaves-first ordering
//! (dependencies before dependents) over a target set, built on
//! `petgraph`'s toposort. Shutdown walks the same order reversed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::state::State;

/// One dependency edge: the owner needs `to` to be at least `required`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEdge {
    /// Name of the component depended on.
    pub to: String,
    /// State the dependency must reach.
    pub required: State,
}

/// A dependency cycle was found while ordering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dependency cycle through '{node}'")]
pub struct CycleError {
    /// The node of the cycle that was touched last.
    pub node: String,
}

/// How hard a required state is to satisfy; unreachable requirements
/// (`Stopping`/`Errored`/`Broken`) are strictest of all.
fn strictness(required: State) -> u8 {
    required.readiness().unwrap_or(u8::MAX)
}

/// Directed dependency graph over component names.
#[derive(Default)]
pub struct DependencyGraph {
    edges: RwLock<HashMap<String, Arc<Vec<DepEdge>>>>,
    /// Monotonic stamp of the last edge mutation touching each node.
    touched: RwLock<HashMap<String, u64>>,
    clock: AtomicU64,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `(from → to, required)`, de-duplicating on `to` and keeping the
    /// strictest required state. Returns the new edge list of `from`.
    pub fn add_dependency(&self, from: &str, to: &str, required: State) -> Arc<Vec<DepEdge>> {
        let stamp = self.clock.fetch_add(1, AtomicOrdering::Relaxed);
        self.touched
            .write()
            .expect("graph lock poisoned")
            .insert(from.to_string(), stamp);

        let mut edges = self.edges.write().expect("graph lock poisoned");
        let current = edges.entry(from.to_string()).or_default();
        let mut next: Vec<DepEdge> = (**current).clone();
        match next.iter_mut().find(|e| e.to == to) {
            Some(existing) => {
                if strictness(required) > strictness(existing.required) {
                    existing.required = required;
                }
            }
            None => next.push(DepEdge {
                to: to.to_string(),
                required,
            }),
        }
        let snapshot = Arc::new(next);
        *current = snapshot.clone();
        snapshot
    }

    /// The outgoing edges of `name` (empty when unknown).
    pub fn edges_from(&self, name: &str) -> Arc<Vec<DepEdge>> {
        self.edges
            .read()
            .expect("graph lock poisoned")
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Names with an edge pointing at `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.edges
            .read()
            .expect("graph lock poisoned")
            .iter()
            .filter(|(_, edges)| edges.iter().any(|e| e.to == name))
            .map(|(from, _)| from.clone())
            .collect()
    }

    /// True iff every outgoing edge of `name` points at a component whose
    /// current state (per `state_of`) meets the edge's requirement.
    pub fn satisfied_by(&self, name: &str, state_of: impl Fn(&str) -> State) -> bool {
        self.edges_from(name)
            .iter()
            .all(|e| state_of(&e.to).satisfies(e.required))
    }

    /// The first unsatisfied edge of `name`, for diagnostics.
    pub fn blocking_edge(&self, name: &str, state_of: impl Fn(&str) -> State) -> Option<DepEdge> {
        self.edges_from(name)
            .iter()
            .find(|e| !state_of(&e.to).satisfies(e.required))
            .cloned()
    }

    /// `roots` plus everything reachable through dependency edges.
    pub fn transitive_closure(&self, roots: &[String]) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<String> = roots.iter().cloned().collect();
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            for edge in self.edges_from(&name).iter() {
                queue.push_back(edge.to.clone());
            }
            order.push(name);
        }
        order
    }

    /// Leaves-first ordering of `targets`: every dependency appears before
    /// its dependents. Edges leaving the target set are ignored.
    ///
    /// A cycle yields [`CycleError`] naming the cycle node that was touched
    /// by the most recent edge mutation.
    pub fn topo_order(&self, targets: &[String]) -> Result<Vec<String>, CycleError> {
        let set: HashSet<&str> = targets.iter().map(String::as_str).collect();
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
        for name in targets {
            let idx = graph.add_node(name.as_str());
            nodes.insert(name.as_str(), idx);
        }
        for name in targets {
            for edge in self.edges_from(name).iter() {
                if set.contains(edge.to.as_str()) {
                    // dep → dependent, so toposort yields leaves first
                    graph.add_edge(nodes[edge.to.as_str()], nodes[name.as_str()], ());
                }
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(|i| graph[i].to_string()).collect()),
            Err(_) => {
                let touched = self.touched.read().expect("graph lock poisoned");
                let node = tarjan_scc(&graph)
                    .into_iter()
                    .filter(|scc| {
                        scc.len() > 1
                            || scc
                                .first()
                                .is_some_and(|&n| graph.find_edge(n, n).is_some())
                    })
                    .flatten()
                    .map(|i| graph[i])
                    .max_by_key(|name| touched.get(*name).copied().unwrap_or(0))
                    .unwrap_or("")
                    .to_string();
                Err(CycleError { node })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dedup_keeps_strictest_requirement() {
        let g = DependencyGraph::new();
        g.add_dependency("a", "b", State::Running);
        let edges = g.add_dependency("a", "b", State::Finished);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].required, State::Finished);

        // A weaker re-declaration does not loosen the edge.
        let edges = g.add_dependency("a", "b", State::Installing);
        assert_eq!(edges[0].required, State::Finished);
    }

    #[test]
    fn topo_is_leaves_first() {
        let g = DependencyGraph::new();
        g.add_dependency("main", "sleeperA", State::Running);
        g.add_dependency("main", "sleeperB", State::Running);
        g.add_dependency("sleeperA", "sleeperB", State::Running);

        let order = g.topo_order(&names(&["main", "sleeperA", "sleeperB"])).unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("sleeperB") < pos("sleeperA"));
        assert!(pos("sleeperA") < pos("main"));
    }

    #[test]
    fn cycle_names_last_touched_node() {
        let g = DependencyGraph::new();
        g.add_dependency("a", "b", State::Running);
        g.add_dependency("b", "a", State::Running);
        let err = g.topo_order(&names(&["a", "b"])).unwrap_err();
        assert_eq!(err.node, "b");
    }

    #[test]
    fn satisfaction_queries() {
        let g = DependencyGraph::new();
        g.add_dependency("x", "y", State::Running);
        g.add_dependency("x", "z", State::Finished);

        let state_of = |name: &str| match name {
            "y" => State::Running,
            "z" => State::Finished,
            _ => State::New,
        };
        assert!(g.satisfied_by("x", state_of));
        assert!(g.satisfied_by("unknown", state_of));

        let partial = |name: &str| match name {
            "y" => State::Running,
            _ => State::New,
        };
        assert!(!g.satisfied_by("x", partial));
        assert_eq!(g.blocking_edge("x", partial).unwrap().to, "z");
    }

    #[test]
    fn closure_follows_edges() {
        let g = DependencyGraph::new();
        g.add_dependency("main", "a", State::Running);
        g.add_dependency("a", "b", State::Running);
        let mut closure = g.transitive_closure(&names(&["main"]));
        closure.sort();
        assert_eq!(closure, names(&["a", "b", "main"]));
    }
}
