//! Real-time execution graph
//!
//! One graph per driver: the driver's vertex plus every node it clocks.
//! Topology uses petgraph's StableGraph with NodeId lookup and a cached
//! topological order. A run visits vertices in that order; a vertex is
//! processed once all of its upstream vertices are done. A vertex whose
//! processor answers [`ProcessStatus::Async`] stays pending until it is
//! triggered, which then releases its dependents.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use tracing::trace;

use crate::implementation::ProcessStatus;
use crate::NodeId;

/// Errors that can occur during graph operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("vertex not found: {0}")]
    VertexNotFound(NodeId),
    #[error("cycle detected in graph")]
    CycleDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VertexState {
    /// Not part of the current cycle.
    Idle,
    /// Waiting for upstream vertices.
    Waiting,
    /// Processor returned Async; waiting for a trigger.
    Async,
    Done,
}

#[derive(Debug)]
struct Vertex {
    id: NodeId,
    required: usize,
    state: VertexState,
}

#[derive(Debug, Default)]
pub struct ExecGraph {
    inner: StableGraph<Vertex, ()>,
    index_map: HashMap<NodeId, NodeIndex>,
    topo_order: Option<Vec<NodeIndex>>,
    pending: usize,
}

impl ExecGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex. Returns false if it is already present.
    pub fn add_vertex(&mut self, id: NodeId) -> bool {
        if self.index_map.contains_key(&id) {
            return false;
        }
        let index = self.inner.add_node(Vertex {
            id,
            required: 0,
            state: VertexState::Idle,
        });
        self.index_map.insert(id, index);
        self.invalidate_topo();
        true
    }

    /// Remove a vertex and its edges. A vertex removed mid-cycle no longer
    /// counts as pending and no longer blocks its dependents.
    pub fn remove_vertex(&mut self, id: NodeId) -> bool {
        let Some(index) = self.index_map.remove(&id) else {
            return false;
        };

        let unfinished = matches!(
            self.inner[index].state,
            VertexState::Waiting | VertexState::Async
        );
        if unfinished {
            self.pending = self.pending.saturating_sub(1);
            let mut walker = self
                .inner
                .neighbors_directed(index, Direction::Outgoing)
                .detach();
            while let Some(next) = walker.next_node(&self.inner) {
                let v = &mut self.inner[next];
                if v.state == VertexState::Waiting {
                    v.required = v.required.saturating_sub(1);
                }
            }
        }

        self.inner.remove_node(index);
        self.invalidate_topo();
        true
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index_map.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    pub fn vertex_ids(&self) -> Vec<NodeId> {
        self.inner.node_weights().map(|v| v.id).collect()
    }

    /// Make `to` depend on `from`.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let from_idx = self.index_of(from)?;
        let to_idx = self.index_of(to)?;

        if self.inner.find_edge(from_idx, to_idx).is_some() {
            return Ok(());
        }

        let edge = self.inner.add_edge(from_idx, to_idx, ());
        if toposort(&self.inner, None).is_err() {
            self.inner.remove_edge(edge);
            return Err(GraphError::CycleDetected);
        }

        self.invalidate_topo();
        Ok(())
    }

    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> bool {
        let (Ok(from_idx), Ok(to_idx)) = (self.index_of(from), self.index_of(to)) else {
            return false;
        };
        match self.inner.find_edge(from_idx, to_idx) {
            Some(edge) => {
                self.inner.remove_edge(edge);
                self.invalidate_topo();
                true
            }
            None => false,
        }
    }

    /// Vertices of the current cycle that have not finished.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Start a new cycle and process every vertex that becomes ready.
    /// Returns the number of vertices still pending afterwards.
    pub fn run<F>(&mut self, mut process: F) -> usize
    where
        F: FnMut(NodeId) -> ProcessStatus,
    {
        self.ensure_topo();
        let order = self.topo_order.take().unwrap_or_default();

        for &index in &order {
            let required = self
                .inner
                .neighbors_directed(index, Direction::Incoming)
                .count();
            let v = &mut self.inner[index];
            v.required = required;
            v.state = VertexState::Waiting;
        }
        self.pending = order.len();

        for &index in &order {
            let v = &self.inner[index];
            if v.state == VertexState::Waiting && v.required == 0 {
                self.process_vertex(index, &mut process);
            }
        }

        self.topo_order = Some(order);
        self.pending
    }

    /// Signal that an asynchronously processing vertex finished. Returns
    /// true when this completed the cycle.
    pub fn trigger<F>(&mut self, id: NodeId, mut process: F) -> bool
    where
        F: FnMut(NodeId) -> ProcessStatus,
    {
        let Some(&index) = self.index_map.get(&id) else {
            return false;
        };
        if self.inner[index].state != VertexState::Async {
            trace!(vertex = %id, "trigger ignored, vertex not awaiting completion");
            return false;
        }
        self.finish_vertex(index, &mut process);
        self.pending == 0
    }

    /// Move every vertex, and the edges between them, into `dst`.
    /// Returns the moved ids; this graph is left empty.
    pub fn drain_into(&mut self, dst: &mut ExecGraph) -> Vec<NodeId> {
        let edges: Vec<(NodeId, NodeId)> = self
            .inner
            .edge_references()
            .map(|e| (self.inner[e.source()].id, self.inner[e.target()].id))
            .collect();
        let ids = self.vertex_ids();

        for &id in &ids {
            dst.add_vertex(id);
        }
        for (from, to) in edges {
            // Both ends were just added, and an acyclic subgraph cannot
            // close a cycle on its own.
            let _ = dst.connect(from, to);
        }

        self.inner.clear();
        self.index_map.clear();
        self.pending = 0;
        self.invalidate_topo();
        ids
    }

    fn process_vertex<F>(&mut self, index: NodeIndex, process: &mut F)
    where
        F: FnMut(NodeId) -> ProcessStatus,
    {
        let id = self.inner[index].id;
        match process(id) {
            ProcessStatus::Done => self.finish_vertex(index, process),
            ProcessStatus::Async => self.inner[index].state = VertexState::Async,
        }
    }

    fn finish_vertex<F>(&mut self, index: NodeIndex, process: &mut F)
    where
        F: FnMut(NodeId) -> ProcessStatus,
    {
        self.inner[index].state = VertexState::Done;
        self.pending = self.pending.saturating_sub(1);

        let mut walker = self
            .inner
            .neighbors_directed(index, Direction::Outgoing)
            .detach();
        while let Some(next) = walker.next_node(&self.inner) {
            let v = &mut self.inner[next];
            if v.state != VertexState::Waiting {
                continue;
            }
            v.required = v.required.saturating_sub(1);
            if v.required == 0 {
                self.process_vertex(next, process);
            }
        }
    }

    fn index_of(&self, id: NodeId) -> Result<NodeIndex, GraphError> {
        self.index_map
            .get(&id)
            .copied()
            .ok_or(GraphError::VertexNotFound(id))
    }

    fn ensure_topo(&mut self) {
        if self.topo_order.is_none() {
            // connect() rejects cycles, so toposort cannot fail here.
            self.topo_order = Some(toposort(&self.inner, None).unwrap_or_default());
        }
    }

    fn invalidate_topo(&mut self) {
        self.topo_order = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids(n: usize) -> Vec<NodeId> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_add_and_remove() {
        let v = ids(2);
        let mut graph = ExecGraph::new();
        assert!(graph.add_vertex(v[0]));
        assert!(!graph.add_vertex(v[0]));
        assert!(graph.add_vertex(v[1]));
        assert_eq!(graph.len(), 2);

        assert!(graph.remove_vertex(v[0]));
        assert!(!graph.contains(v[0]));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_run_visits_in_dependency_order() {
        let v = ids(3);
        let mut graph = ExecGraph::new();
        for id in &v {
            graph.add_vertex(*id);
        }
        graph.connect(v[2], v[1]).unwrap();
        graph.connect(v[1], v[0]).unwrap();

        let mut visited = Vec::new();
        let pending = graph.run(|id| {
            visited.push(id);
            ProcessStatus::Done
        });

        assert_eq!(pending, 0);
        assert_eq!(visited, vec![v[2], v[1], v[0]]);
    }

    #[test]
    fn test_cycle_detection() {
        let v = ids(2);
        let mut graph = ExecGraph::new();
        graph.add_vertex(v[0]);
        graph.add_vertex(v[1]);
        graph.connect(v[0], v[1]).unwrap();

        assert_eq!(graph.connect(v[1], v[0]), Err(GraphError::CycleDetected));
    }

    #[test]
    fn test_async_vertex_blocks_dependents_until_trigger() {
        let v = ids(2);
        let mut graph = ExecGraph::new();
        graph.add_vertex(v[0]);
        graph.add_vertex(v[1]);
        graph.connect(v[0], v[1]).unwrap();

        let mut visited = Vec::new();
        let pending = graph.run(|id| {
            visited.push(id);
            if id == v[0] {
                ProcessStatus::Async
            } else {
                ProcessStatus::Done
            }
        });
        assert_eq!(pending, 2);
        assert_eq!(visited, vec![v[0]]);

        let done = graph.trigger(v[0], |id| {
            visited.push(id);
            ProcessStatus::Done
        });
        assert!(done);
        assert_eq!(graph.pending(), 0);
        assert_eq!(visited, vec![v[0], v[1]]);
    }

    #[test]
    fn test_trigger_outside_cycle_is_ignored() {
        let v = ids(1);
        let mut graph = ExecGraph::new();
        graph.add_vertex(v[0]);

        let mut calls = 0;
        assert!(!graph.trigger(v[0], |_| {
            calls += 1;
            ProcessStatus::Done
        }));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_drain_into_keeps_edges() {
        let v = ids(3);
        let mut src = ExecGraph::new();
        src.add_vertex(v[0]);
        src.add_vertex(v[1]);
        src.connect(v[1], v[0]).unwrap();

        let mut dst = ExecGraph::new();
        dst.add_vertex(v[2]);

        let moved = src.drain_into(&mut dst);
        assert_eq!(moved.len(), 2);
        assert!(src.is_empty());
        assert_eq!(dst.len(), 3);

        let mut visited = Vec::new();
        dst.run(|id| {
            visited.push(id);
            ProcessStatus::Done
        });
        let pos = |id| visited.iter().position(|x| *x == id).unwrap();
        assert!(pos(v[1]) < pos(v[0]));
    }

    #[test]
    fn test_remove_pending_vertex_releases_count() {
        let v = ids(2);
        let mut graph = ExecGraph::new();
        graph.add_vertex(v[0]);
        graph.add_vertex(v[1]);

        graph.run(|id| {
            if id == v[0] {
                ProcessStatus::Async
            } else {
                ProcessStatus::Done
            }
        });
        assert_eq!(graph.pending(), 1);

        graph.remove_vertex(v[0]);
        assert_eq!(graph.pending(), 0);
    }
}
