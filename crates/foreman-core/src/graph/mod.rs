//! Cycle-checked task graph.
//!
//! Vertices are tasks keyed by identifier; an edge `u -> v` means "v depends
//! on u" (v executes only after u reaches a successful terminal state).
//! Every mutation that may introduce an edge validates acyclicity before
//! returning, and leaves the graph unchanged on failure.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::model::{Task, TaskStatus};

/// Structural errors from graph mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate task id {0:?}")]
    DuplicateId(String),

    #[error("unknown task id {0:?}")]
    UnknownNode(String),

    #[error("dependency cycle detected involving tasks: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// DFS visit state for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// A labeled directed acyclic graph owning every task vertex.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: HashMap<String, Task>,
    /// `successors[u]` holds every v with an edge u -> v (v depends on u).
    successors: HashMap<String, Vec<String>>,
    /// `predecessors[v]` holds every u with an edge u -> v.
    predecessors: HashMap<String, Vec<String>>,
    /// Vertex ids in insertion order, for deterministic iteration.
    order: Vec<String>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no vertices.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a vertex. Fails with [`GraphError::DuplicateId`] if a vertex
    /// with the same id exists.
    pub fn add_node(&mut self, task: Task) -> Result<(), GraphError> {
        if self.nodes.contains_key(&task.id) {
            return Err(GraphError::DuplicateId(task.id.clone()));
        }
        self.order.push(task.id.clone());
        self.nodes.insert(task.id.clone(), task);
        Ok(())
    }

    /// Insert the edge `from -> to` ("to depends on from").
    ///
    /// Fails with [`GraphError::UnknownNode`] if either endpoint is missing
    /// and with [`GraphError::Cycle`] if the edge would close a directed
    /// cycle. The graph is unchanged when this returns an error. Inserting
    /// an edge that already exists is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        if !self.nodes.contains_key(from) {
            return Err(GraphError::UnknownNode(from.to_owned()));
        }
        if !self.nodes.contains_key(to) {
            return Err(GraphError::UnknownNode(to.to_owned()));
        }
        if self
            .successors
            .get(from)
            .is_some_and(|succs| succs.iter().any(|s| s == to))
        {
            return Ok(());
        }

        self.successors
            .entry(from.to_owned())
            .or_default()
            .push(to.to_owned());
        self.predecessors
            .entry(to.to_owned())
            .or_default()
            .push(from.to_owned());

        if let Err(err) = self.validate_no_cycles() {
            // Roll back: the new edge is the last entry in both lists.
            if let Some(succs) = self.successors.get_mut(from) {
                succs.pop();
            }
            if let Some(preds) = self.predecessors.get_mut(to) {
                preds.pop();
            }
            return Err(err);
        }
        Ok(())
    }

    /// Whether a vertex with this id exists.
    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Retrieve a vertex.
    pub fn get_node(&self, id: &str) -> Option<&Task> {
        self.nodes.get(id)
    }

    /// Retrieve a vertex mutably.
    pub fn get_node_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.nodes.get_mut(id)
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Vertex ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Consume the graph, yielding tasks in insertion order.
    pub fn into_tasks(mut self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.remove(id))
            .collect()
    }

    /// Ids of the direct dependencies of `id` (edges `u -> id`).
    pub fn predecessors_of(&self, id: &str) -> &[String] {
        self.predecessors.get(id).map_or(&[], Vec::as_slice)
    }

    /// Ids of the direct dependents of `id` (edges `id -> v`).
    pub fn successors_of(&self, id: &str) -> &[String] {
        self.successors.get(id).map_or(&[], Vec::as_slice)
    }

    /// Ids of every vertex that is eligible to be drawn by a worker: not
    /// yet completed, not currently `Started`, with every predecessor in
    /// `completed`.
    ///
    /// Eligibility is by readiness rather than by status so that vertices
    /// pre-marked `Planned` or `Aborted` by propagation are surfaced and
    /// can be retired by a worker.
    pub fn executable_tasks(&self, completed: &HashSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                if completed.contains(*id) {
                    return false;
                }
                let Some(task) = self.nodes.get(*id) else {
                    return false;
                };
                if matches!(task.status, TaskStatus::Started | TaskStatus::Succeeded) {
                    return false;
                }
                self.predecessors_of(id.as_str())
                    .iter()
                    .all(|dep| completed.contains(dep))
            })
            .cloned()
            .collect()
    }

    /// Full-graph cycle scan using depth-first search with white/grey/black
    /// coloring. Returns [`GraphError::Cycle`] carrying the offending path.
    pub fn validate_no_cycles(&self) -> Result<(), GraphError> {
        let mut color: HashMap<&str, Color> =
            self.nodes.keys().map(|id| (id.as_str(), Color::White)).collect();
        let mut path: Vec<&str> = Vec::new();

        for id in &self.order {
            if color.get(id.as_str()) == Some(&Color::White) {
                if let Some(cycle) = self.visit(id, &mut color, &mut path) {
                    return Err(GraphError::Cycle(cycle));
                }
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        color: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        color.insert(id, Color::Grey);
        path.push(id);

        for next in self.successors_of(id) {
            match color.get(next.as_str()).copied().unwrap_or(Color::White) {
                Color::Grey => {
                    // The cycle runs from the first occurrence of `next` on
                    // the current path back to itself.
                    let start = path.iter().position(|p| *p == next.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| (*s).to_owned()).collect();
                    cycle.push(next.clone());
                    return Some(cycle);
                }
                Color::White => {
                    if let Some(cycle) = self.visit(next, color, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        path.pop();
        color.insert(id, Color::Black);
        None
    }
}
