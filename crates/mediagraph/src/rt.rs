//! Real-time state of every node, owned by the data loop
//!
//! The control plane never touches this directly: every change arrives as a
//! closure run by [`DataLoop`](crate::data_loop::DataLoop). Each node owns an
//! [`ExecGraph`]; a node's vertex lives in exactly one of them, its own when
//! it drives itself, otherwise its driver's.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{trace, warn};

use crate::clock::{Clock, Quantum};
use crate::exec_graph::{ExecGraph, GraphError};
use crate::implementation::{ProcessStatus, Processor};
use crate::listener::NodeListener;
use crate::NodeId;

pub struct RtNode {
    driver: bool,
    remote: bool,
    runnable: bool,
    clock: Option<Arc<Clock>>,
    quantum: Quantum,
    next_position: u64,
    /// Owner of the graph holding this node's vertex.
    member_of: NodeId,
    processor: Option<Arc<dyn Processor>>,
    listeners: Arc<[Arc<dyn NodeListener>]>,
}

impl RtNode {
    fn new(id: NodeId, quantum: Quantum) -> Self {
        Self {
            driver: false,
            remote: false,
            runnable: false,
            clock: None,
            quantum,
            next_position: 0,
            member_of: id,
            processor: None,
            listeners: Arc::from(Vec::new()),
        }
    }
}

pub struct RtContext {
    nodes: HashMap<NodeId, RtNode>,
    graphs: HashMap<NodeId, ExecGraph>,
    epoch: Instant,
}

impl Default for RtContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RtContext {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            graphs: HashMap::new(),
            epoch: Instant::now(),
        }
    }

    /// Add a self-driving node with its own one-vertex graph.
    pub fn add_node(&mut self, id: NodeId, quantum: Quantum) {
        let mut graph = ExecGraph::new();
        graph.add_vertex(id);
        self.graphs.insert(id, graph);
        self.nodes.insert(id, RtNode::new(id, quantum));
    }

    /// Drop a node's vertex and state. Vertices still in its graph are
    /// re-homed to their own graphs.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.remove(&id) else {
            return false;
        };
        if let Some(graph) = self.graphs.get_mut(&node.member_of) {
            graph.remove_vertex(id);
        }
        if let Some(own) = self.graphs.remove(&id) {
            for orphan in own.vertex_ids() {
                warn!(node = %id, orphan = %orphan, "removed driver still held a vertex");
                self.graphs.entry(orphan).or_default().add_vertex(orphan);
                if let Some(n) = self.nodes.get_mut(&orphan) {
                    n.member_of = orphan;
                }
            }
        }
        true
    }

    /// Relocate `id` and everything in its own graph into `driver`'s graph.
    /// With `driver == id` the node just returns to its own graph.
    pub fn move_nodes(&mut self, id: NodeId, driver: NodeId) -> Result<(), GraphError> {
        if !self.graphs.contains_key(&driver) {
            return Err(GraphError::VertexNotFound(driver));
        }
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphError::VertexNotFound(id))?;
        let old = node.member_of;
        node.member_of = id;

        if let Some(graph) = self.graphs.get_mut(&old) {
            graph.remove_vertex(id);
        }
        self.graphs.entry(id).or_default().add_vertex(id);

        if driver != id {
            let mut own = self.graphs.remove(&id).unwrap_or_default();
            let moved = match self.graphs.get_mut(&driver) {
                Some(dst) => own.drain_into(dst),
                None => Vec::new(),
            };
            self.graphs.insert(id, own);
            for m in moved {
                if let Some(n) = self.nodes.get_mut(&m) {
                    n.member_of = driver;
                }
            }
        }
        trace!(node = %id, driver = %driver, "moved nodes");
        Ok(())
    }

    /// Make `to` run after `from`. Both must share a graph.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let owner = self
            .nodes
            .get(&from)
            .ok_or(GraphError::VertexNotFound(from))?
            .member_of;
        let to_owner = self
            .nodes
            .get(&to)
            .ok_or(GraphError::VertexNotFound(to))?
            .member_of;
        if owner != to_owner {
            return Err(GraphError::VertexNotFound(to));
        }
        self.graphs
            .get_mut(&owner)
            .ok_or(GraphError::VertexNotFound(owner))?
            .connect(from, to)
    }

    pub fn set_driver(&mut self, id: NodeId, driver: bool) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.driver = driver;
        }
    }

    pub fn set_remote(&mut self, id: NodeId, remote: bool) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.remote = remote;
        }
    }

    pub fn set_runnable(&mut self, id: NodeId, runnable: bool) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.runnable = runnable;
        }
    }

    pub fn set_clock(&mut self, id: NodeId, clock: Option<Arc<Clock>>) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.clock = clock;
        }
    }

    pub fn set_quantum_size(&mut self, id: NodeId, size: u32) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.quantum.size = size;
        }
    }

    pub fn set_processor(&mut self, id: NodeId, processor: Option<Arc<dyn Processor>>) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.processor = processor;
        }
    }

    pub fn set_listeners(&mut self, id: NodeId, listeners: Arc<[Arc<dyn NodeListener>]>) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.listeners = listeners;
        }
    }

    /// Per-cycle callback of node `id`.
    ///
    /// A driver computes a fresh quantum and runs its graph, unless a
    /// previous cycle is still pending and the node is remote; then, like
    /// any non-driver, it only triggers its own vertex.
    pub fn process(&mut self, id: NodeId) {
        let RtContext {
            nodes,
            graphs,
            epoch,
        } = self;

        let Some(node) = nodes.get_mut(&id) else {
            trace!(node = %id, "process for unknown node");
            return;
        };
        trace!(node = %id, driver = node.driver, remote = node.remote, "process");

        for listener in node.listeners.iter() {
            listener.process(id);
        }

        let pending = graphs.get(&id).map(ExecGraph::pending).unwrap_or(0);

        if node.driver && (pending == 0 || !node.remote) {
            let q = &mut node.quantum;
            match &node.clock {
                Some(clock) => {
                    let reading = clock.read();
                    q.nsec = reading.nsec;
                    q.rate = reading.rate;
                    q.rate_diff = reading.rate_diff;
                    q.position = reading.position;
                    q.delay = reading.delay;
                }
                None => {
                    q.nsec = epoch.elapsed().as_nanos() as u64;
                    q.position = node.next_position;
                    q.delay = 0;
                }
            }
            node.next_position += u64::from(q.size);

            let quantum = *q;
            let listeners = Arc::clone(&node.listeners);

            trace!(
                node = %id,
                nsec = quantum.nsec,
                position = quantum.position,
                delay = quantum.delay,
                size = quantum.size,
                "run"
            );

            let Some(graph) = graphs.get_mut(&id) else {
                return;
            };
            let nodes = &*nodes;
            if graph.run(|v| process_vertex(nodes, v, &quantum)) == 0 {
                for listener in listeners.iter() {
                    listener.finish(id);
                }
            }
        } else {
            let owner = node.member_of;
            trigger(nodes, graphs, owner, id);
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// The last quantum computed by (or configured for) `id`.
    pub fn quantum(&self, id: NodeId) -> Option<Quantum> {
        self.nodes.get(&id).map(|n| n.quantum)
    }

    /// Owner of the graph holding `id`'s vertex.
    pub fn graph_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).map(|n| n.member_of)
    }

    /// Vertices in the graph owned by `driver`.
    pub fn graph_members(&self, driver: NodeId) -> Vec<NodeId> {
        self.graphs
            .get(&driver)
            .map(ExecGraph::vertex_ids)
            .unwrap_or_default()
    }

    pub fn pending(&self, driver: NodeId) -> usize {
        self.graphs.get(&driver).map(ExecGraph::pending).unwrap_or(0)
    }
}

fn trigger(
    nodes: &HashMap<NodeId, RtNode>,
    graphs: &mut HashMap<NodeId, ExecGraph>,
    owner: NodeId,
    vertex: NodeId,
) {
    let Some(driver) = nodes.get(&owner) else {
        return;
    };
    let quantum = driver.quantum;
    let Some(graph) = graphs.get_mut(&owner) else {
        return;
    };
    if graph.trigger(vertex, |v| process_vertex(nodes, v, &quantum)) {
        for listener in driver.listeners.iter() {
            listener.finish(owner);
        }
    }
}

fn process_vertex(nodes: &HashMap<NodeId, RtNode>, id: NodeId, quantum: &Quantum) -> ProcessStatus {
    match nodes.get(&id) {
        Some(node) if node.runnable => match &node.processor {
            Some(processor) => processor.process(quantum),
            None => ProcessStatus::Done,
        },
        _ => ProcessStatus::Done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Counting(AtomicUsize);

    impl Processor for Counting {
        fn process(&self, _quantum: &Quantum) -> ProcessStatus {
            self.0.fetch_add(1, Ordering::SeqCst);
            ProcessStatus::Done
        }
    }

    fn driver_ctx() -> (RtContext, NodeId) {
        let mut rt = RtContext::new();
        let id = Uuid::new_v4();
        rt.add_node(id, Quantum::new(128, 48_000));
        rt.set_driver(id, true);
        (rt, id)
    }

    #[test]
    fn test_position_advances_by_quantum() {
        let (mut rt, id) = driver_ctx();

        rt.process(id);
        assert_eq!(rt.quantum(id).unwrap().position, 0);
        rt.process(id);
        assert_eq!(rt.quantum(id).unwrap().position, 128);
        rt.process(id);
        assert_eq!(rt.quantum(id).unwrap().position, 256);
    }

    #[test]
    fn test_clock_overrides_position() {
        let (mut rt, id) = driver_ctx();
        let clock = Arc::new(Clock::new(48_000));
        clock.update(crate::clock::ClockReading {
            nsec: 42,
            rate: 44_100,
            rate_diff: 1.0,
            position: 9000,
            delay: 32,
        });
        rt.set_clock(id, Some(clock));

        rt.process(id);
        let q = rt.quantum(id).unwrap();
        assert_eq!(q.position, 9000);
        assert_eq!(q.rate, 44_100);
        assert_eq!(q.delay, 32);
    }

    #[test]
    fn test_move_nodes_into_driver_graph() {
        let (mut rt, driver) = driver_ctx();
        let follower = Uuid::new_v4();
        rt.add_node(follower, Quantum::new(128, 48_000));

        rt.move_nodes(follower, driver).unwrap();
        assert_eq!(rt.graph_of(follower), Some(driver));
        assert_eq!(rt.graph_members(driver).len(), 2);
        assert!(rt.graph_members(follower).is_empty());

        rt.move_nodes(follower, follower).unwrap();
        assert_eq!(rt.graph_of(follower), Some(follower));
        assert_eq!(rt.graph_members(driver), vec![driver]);
    }

    #[test]
    fn test_only_runnable_nodes_process() {
        let (mut rt, driver) = driver_ctx();
        let follower = Uuid::new_v4();
        rt.add_node(follower, Quantum::new(128, 48_000));
        rt.move_nodes(follower, driver).unwrap();

        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        rt.set_processor(follower, Some(counter.clone() as Arc<dyn Processor>));

        rt.process(driver);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        rt.set_runnable(follower, true);
        rt.process(driver);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_node_drops_vertex() {
        let (mut rt, driver) = driver_ctx();
        let follower = Uuid::new_v4();
        rt.add_node(follower, Quantum::new(128, 48_000));
        rt.move_nodes(follower, driver).unwrap();

        assert!(rt.remove_node(follower));
        assert!(!rt.contains(follower));
        assert_eq!(rt.graph_members(driver), vec![driver]);
    }
}
