//! Control-plane owner of every node
//!
//! The engine is the node arena. Operations that touch a single node
//! delegate to [`Node`]; the ones that span nodes (driver membership,
//! teardown) or need the data loop live here.
//!
//! ```text
//! Engine ──owns──► Node ──owns──► Port ──holds──► Arc<dyn Link>
//!   │                 └─► Resource (bound observers)
//!   ├─► Registry (globals)
//!   └─► DataLoop ──owns──► RtContext (quantum, clock, ExecGraph per node)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use mediaconf::MediaConfig;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, Quantum};
use crate::data_loop::{DataLoop, LoopHandle};
use crate::implementation::{ImplError, NodeImplementation, Param};
use crate::listener::{ListenerId, NodeEvent, NodeListener};
use crate::node::{Node, NodeError};
use crate::port::{Direction, Port};
use crate::properties::Properties;
use crate::registry::{GlobalId, NodeObserver, Registry, Resource, ResourceId};
use crate::state::NodeState;
use crate::NodeId;

/// Engine settings, usually derived from [`MediaConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Frames per cycle for new drivers.
    pub quantum_size: u32,
    pub rate: u32,
    /// Default for `node.pause-on-idle`.
    pub pause_on_idle: bool,
    pub queue_size: usize,
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&MediaConfig::default())
    }
}

impl From<&MediaConfig> for EngineConfig {
    fn from(config: &MediaConfig) -> Self {
        Self {
            quantum_size: config.graph.quantum_size,
            rate: config.graph.rate,
            pause_on_idle: config.graph.pause_on_idle,
            queue_size: config.data_loop.queue_size,
            thread_name: config.data_loop.thread_name.clone(),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    nodes: BTreeMap<NodeId, Node>,
    /// Registered nodes in registration order.
    node_list: Vec<NodeId>,
    registry: Registry,
    data_loop: DataLoop,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let data_loop = DataLoop::new(config.queue_size, config.thread_name.clone());
        Self {
            config,
            nodes: BTreeMap::new(),
            node_list: Vec::new(),
            registry: Registry::new(),
            data_loop,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Move the RT context onto its own thread.
    pub fn start_data_loop(&mut self) -> Result<(), NodeError> {
        Ok(self.data_loop.start()?)
    }

    pub fn stop_data_loop(&mut self) -> Result<(), NodeError> {
        Ok(self.data_loop.stop()?)
    }

    /// Non-blocking submitter for device threads. `None` until the loop is
    /// started.
    pub fn loop_handle(&self) -> Option<LoopHandle> {
        self.data_loop.handle()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Registered nodes in registration order.
    pub fn registered_nodes(&self) -> &[NodeId] {
        &self.node_list
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, NodeError> {
        self.nodes.get_mut(&id).ok_or(NodeError::NotFound(id))
    }

    fn node_ref(&self, id: NodeId) -> Result<&Node, NodeError> {
        self.nodes.get(&id).ok_or(NodeError::NotFound(id))
    }

    /// Create a self-driving node in `Creating`. Nothing is kept when the
    /// RT side cannot be set up.
    pub fn create_node(
        &mut self,
        name: impl Into<String>,
        properties: Properties,
    ) -> Result<NodeId, NodeError> {
        let id = Uuid::new_v4();
        let node = Node::new(id, name, properties, &self.config);
        let quantum = Quantum::new(self.config.quantum_size, self.config.rate);
        let driver = node.is_driver();

        self.data_loop.invoke_async(move |rt| {
            rt.add_node(id, quantum);
            rt.set_driver(id, driver);
        })?;

        self.nodes.insert(id, node);
        Ok(id)
    }

    pub fn set_implementation(
        &mut self,
        id: NodeId,
        implementation: Box<dyn NodeImplementation>,
    ) -> Result<(), NodeError> {
        let node = self.node_mut(id)?;
        let processor = node.set_implementation(implementation);
        let driver = node.is_driver();
        self.data_loop.invoke_async(move |rt| {
            rt.set_processor(id, processor);
            rt.set_driver(id, driver);
        })?;
        Ok(())
    }

    /// Publish the node and its ports. The node moves to `Suspended`.
    pub fn register(
        &mut self,
        id: NodeId,
        parent: Option<GlobalId>,
        properties: Properties,
    ) -> Result<GlobalId, NodeError> {
        let Engine {
            nodes,
            registry,
            node_list,
            ..
        } = self;
        let node = nodes.get_mut(&id).ok_or(NodeError::NotFound(id))?;
        let global = node.register(registry, parent, properties)?;
        node_list.push(id);
        info!(node = %id, global, name = %node.name(), "registered node");
        Ok(global)
    }

    /// Bind an observer. It receives the full info right away.
    pub fn bind(
        &mut self,
        id: NodeId,
        observer: Box<dyn NodeObserver>,
    ) -> Result<ResourceId, NodeError> {
        let resource_id = self.registry.next_resource_id();
        let node = self.node_mut(id)?;
        node.bind(Resource::new(resource_id, observer));
        Ok(resource_id)
    }

    pub fn unbind(&mut self, id: NodeId, resource: ResourceId) -> Result<(), NodeError> {
        self.node_mut(id)?.unbind(resource)
    }

    /// Enumerate params into a bound observer. Returns how many were sent.
    pub fn enum_params(
        &self,
        id: NodeId,
        resource: ResourceId,
        seq: u32,
        param_id: u32,
        start: u32,
        max: u32,
    ) -> Result<u32, NodeError> {
        self.node_ref(id)?
            .param_to_resource(resource, seq, param_id, start, max)
    }

    /// Enumerate params into a callback taking `(index, next, param)`.
    pub fn for_each_param<F>(
        &self,
        id: NodeId,
        param_id: u32,
        start: u32,
        max: u32,
        f: F,
    ) -> Result<u32, NodeError>
    where
        F: FnMut(u32, u32, &Param),
    {
        self.node_ref(id)?.for_each_param(param_id, start, max, f)
    }

    pub fn update_properties(
        &mut self,
        id: NodeId,
        properties: &Properties,
    ) -> Result<(), NodeError> {
        let node = self.node_mut(id)?;
        if node.update_properties(properties) {
            let driver = node.is_driver();
            debug!(node = %id, driver, "driver flag changed");
            self.data_loop
                .invoke_async(move |rt| rt.set_driver(id, driver))?;
        }
        Ok(())
    }

    pub fn update_ports(&mut self, id: NodeId) -> Result<(), NodeError> {
        let Engine {
            nodes, registry, ..
        } = self;
        nodes
            .get_mut(&id)
            .ok_or(NodeError::NotFound(id))?
            .update_ports(registry)
    }

    /// Move `id`, and every node it drives, under `driver` (`None` means
    /// self-driving).
    pub fn set_driver(&mut self, id: NodeId, driver: Option<NodeId>) -> Result<(), NodeError> {
        let driver = driver.unwrap_or(id);
        if !self.nodes.contains_key(&driver) {
            return Err(NodeError::NotFound(driver));
        }
        let old = self.node_ref(id)?.driver_node;

        debug!(node = %id, old = %old, driver = %driver, "set driver");
        if old == driver {
            return Ok(());
        }

        // Vertices move first; a failed move leaves the driver lists alone.
        self.data_loop
            .invoke(move |rt| rt.move_nodes(id, driver))??;

        if let Some(old_driver) = self.nodes.get_mut(&old) {
            old_driver.driver_list.retain(|n| *n != id);
        }
        self.node_mut(driver)?.driver_list.push(id);

        let followers = {
            let node = self.node_mut(id)?;
            node.driver_node = driver;
            let mut followers = std::mem::take(&mut node.driver_list);
            followers.retain(|n| *n != id);
            if driver == id {
                node.driver_list.push(id);
            }
            followers
        };

        for follower in followers {
            self.node_mut(driver)?.driver_list.push(follower);
            if let Some(n) = self.nodes.get_mut(&follower) {
                debug!(node = %follower, driver = %driver, "follower moved");
                n.driver_node = driver;
                n.emit_driver_changed(driver);
            }
        }

        self.node_ref(id)?.emit_driver_changed(driver);
        Ok(())
    }

    /// Request a state change; the state itself moves on completion.
    pub fn set_state(&mut self, id: NodeId, state: NodeState) -> Result<(), NodeError> {
        self.node_mut(id)?.set_state(state)
    }

    /// Record a state the node reached on its own.
    pub fn update_state(
        &mut self,
        id: NodeId,
        state: NodeState,
        error: Option<String>,
    ) -> Result<(), NodeError> {
        self.node_mut(id)?.update_state(state, error);
        Ok(())
    }

    pub fn set_active(&mut self, id: NodeId, active: bool) -> Result<(), NodeError> {
        let node = self.node_mut(id)?;
        if node.set_active(active) {
            self.sync_runnable(id)?;
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<(), NodeError> {
        let node = self.node_mut(id)?;
        if node.set_enabled(enabled) {
            self.sync_runnable(id)?;
        }
        Ok(())
    }

    fn sync_runnable(&mut self, id: NodeId) -> Result<(), NodeError> {
        let runnable = self.node_ref(id)?.is_runnable();
        self.data_loop
            .invoke_async(move |rt| rt.set_runnable(id, runnable))?;
        Ok(())
    }

    pub fn find_port(
        &self,
        id: NodeId,
        direction: Direction,
        port_id: Option<u32>,
    ) -> Option<&Port> {
        self.nodes.get(&id)?.find_port(direction, port_id)
    }

    /// Mutable port access, e.g. for attaching links.
    pub fn port_mut(&mut self, id: NodeId, direction: Direction, port_id: u32) -> Option<&mut Port> {
        self.nodes.get_mut(&id)?.port_mut(direction, port_id)
    }

    pub fn get_free_port_id(
        &mut self,
        id: NodeId,
        direction: Direction,
    ) -> Result<Option<u32>, NodeError> {
        Ok(self.node_mut(id)?.get_free_port_id(direction))
    }

    /// The implementation finished request `seq`.
    pub fn on_done(
        &mut self,
        id: NodeId,
        seq: u32,
        result: Result<(), ImplError>,
    ) -> Result<(), NodeError> {
        self.node_mut(id)?.on_done(seq, result);
        Ok(())
    }

    pub fn on_event(&self, id: NodeId, event: &NodeEvent) -> Result<(), NodeError> {
        let node = self.node_ref(id)?;
        debug!(node = %id, ?event, "event");
        node.listeners().emit(|l| l.event(id, event));
        Ok(())
    }

    pub fn on_reuse_buffer(
        &self,
        id: NodeId,
        port_id: u32,
        buffer_id: u32,
    ) -> Result<(), NodeError> {
        self.node_ref(id)?.reuse_buffer(port_id, buffer_id);
        Ok(())
    }

    /// Queue one cycle callback for `id` on the data loop.
    pub fn process(&mut self, id: NodeId) -> Result<(), NodeError> {
        self.node_ref(id)?;
        self.data_loop.invoke_async(move |rt| rt.process(id))?;
        Ok(())
    }

    /// Run ready state completions on every node.
    pub fn dispatch_work(&mut self) -> usize {
        self.nodes.values_mut().map(Node::dispatch_work).sum()
    }

    pub fn add_listener(
        &mut self,
        id: NodeId,
        listener: Arc<dyn NodeListener>,
    ) -> Result<ListenerId, NodeError> {
        let listener_id = self.node_mut(id)?.add_listener(listener);
        self.sync_listeners(id)?;
        Ok(listener_id)
    }

    pub fn remove_listener(&mut self, id: NodeId, listener: ListenerId) -> Result<bool, NodeError> {
        let removed = self.node_mut(id)?.remove_listener(listener);
        if removed {
            self.sync_listeners(id)?;
        }
        Ok(removed)
    }

    fn sync_listeners(&mut self, id: NodeId) -> Result<(), NodeError> {
        let snapshot = self.node_ref(id)?.listeners().snapshot();
        self.data_loop
            .invoke_async(move |rt| rt.set_listeners(id, snapshot))?;
        Ok(())
    }

    pub fn set_clock(&mut self, id: NodeId, clock: Option<Arc<Clock>>) -> Result<(), NodeError> {
        self.node_ref(id)?;
        self.data_loop.invoke_async(move |rt| rt.set_clock(id, clock))?;
        Ok(())
    }

    pub fn set_quantum_size(&mut self, id: NodeId, size: u32) -> Result<(), NodeError> {
        self.node_ref(id)?;
        self.data_loop
            .invoke_async(move |rt| rt.set_quantum_size(id, size))?;
        Ok(())
    }

    /// Mark the node as exported to a remote peer.
    pub fn set_remote(&mut self, id: NodeId, remote: bool) -> Result<(), NodeError> {
        self.node_mut(id)?.set_remote(remote);
        self.data_loop
            .invoke_async(move |rt| rt.set_remote(id, remote))?;
        Ok(())
    }

    /// Order `to` after `from` in the graph they share.
    pub fn link_nodes(&mut self, from: NodeId, to: NodeId) -> Result<(), NodeError> {
        self.node_ref(from)?;
        self.node_ref(to)?;
        self.data_loop.invoke(move |rt| rt.connect(from, to))??;
        Ok(())
    }

    /// Last quantum seen by the data loop for `id`.
    pub fn quantum(&mut self, id: NodeId) -> Result<Option<Quantum>, NodeError> {
        Ok(self.data_loop.invoke(move |rt| rt.quantum(id))?)
    }

    /// Vertices in the graph `driver` owns on the data loop.
    pub fn graph_members(&mut self, driver: NodeId) -> Result<Vec<NodeId>, NodeError> {
        Ok(self.data_loop.invoke(move |rt| rt.graph_members(driver))?)
    }

    /// Whether the data loop still schedules `id`.
    pub fn is_scheduled(&mut self, id: NodeId) -> Result<bool, NodeError> {
        Ok(self.data_loop.invoke(move |rt| rt.contains(id))?)
    }

    /// Tear the node down. Every step runs even when an earlier one failed.
    pub fn destroy(&mut self, id: NodeId) -> Result<(), NodeError> {
        let node = self.node_mut(id)?;
        debug!(node = %id, "destroy");
        node.emit_destroy();

        if let Err(e) = node.pause() {
            debug!(node = %id, "pause on destroy: {}", e);
        }

        let followers: Vec<NodeId> = node
            .driver_list
            .iter()
            .copied()
            .filter(|n| *n != id)
            .collect();
        for follower in followers {
            if let Err(e) = self.set_driver(follower, None) {
                warn!(node = %id, follower = %follower, "detach follower: {}", e);
            }
        }

        let driver = self.node_ref(id)?.driver_node;
        if driver != id {
            if let Some(d) = self.nodes.get_mut(&driver) {
                d.driver_list.retain(|n| *n != id);
            }
        }
        if let Err(e) = self.data_loop.invoke(move |rt| rt.remove_node(id)) {
            warn!(node = %id, "remove from data loop: {}", e);
        }

        self.node_list.retain(|n| *n != id);

        let Engine {
            nodes, registry, ..
        } = self;
        if let Some(mut node) = nodes.remove(&id) {
            node.teardown_ports(registry);
            node.unpublish(registry);
            node.emit_free();
            let dropped = node.cancel_work();
            if dropped > 0 {
                debug!(node = %id, dropped, "dropped pending completions");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::implementation::{Completion, NodeCommand, PortCounts, PortInfo};
    use crate::properties::NODE_DRIVER;

    #[derive(Default)]
    struct Stub;

    impl NodeImplementation for Stub {
        fn send_command(&mut self, _command: NodeCommand) -> Result<Completion, ImplError> {
            Ok(Completion::Done)
        }

        fn port_counts(&self) -> Result<PortCounts, ImplError> {
            Ok(PortCounts {
                n_input: 1,
                max_input: 1,
                n_output: 0,
                max_output: 0,
            })
        }

        fn port_ids(&self, direction: Direction) -> Result<Vec<u32>, ImplError> {
            Ok(match direction {
                Direction::Input => vec![0],
                Direction::Output => vec![],
            })
        }

        fn port_info(&self, _direction: Direction, _port_id: u32) -> Result<PortInfo, ImplError> {
            Ok(PortInfo::default())
        }

        fn port_clear_format(&mut self, _direction: Direction, _port_id: u32) -> Result<(), ImplError> {
            Ok(())
        }

        fn enum_params(&self, _param_id: u32, _index: &mut u32) -> Result<Option<Param>, ImplError> {
            Ok(None)
        }
    }

    fn engine_with(n: usize) -> (Engine, Vec<NodeId>) {
        let mut engine = Engine::new(EngineConfig::default());
        let ids = (0..n)
            .map(|i| {
                let id = engine
                    .create_node(format!("node-{i}"), Properties::new())
                    .unwrap();
                engine.set_implementation(id, Box::new(Stub)).unwrap();
                id
            })
            .collect();
        (engine, ids)
    }

    #[test]
    fn test_config_from_media_config() {
        let mut media = MediaConfig::default();
        media.graph.quantum_size = 256;
        media.data_loop.queue_size = 8;
        let config = EngineConfig::from(&media);
        assert_eq!(config.quantum_size, 256);
        assert_eq!(config.queue_size, 8);
    }

    #[test]
    fn test_new_node_drives_itself() {
        let (engine, ids) = engine_with(1);
        let node = engine.node(ids[0]).unwrap();
        assert_eq!(node.driver_node(), ids[0]);
        assert_eq!(node.driver_list(), &[ids[0]]);
        assert_eq!(node.state(), NodeState::Creating);
    }

    #[test]
    fn test_set_driver_moves_followers() {
        let (mut engine, ids) = engine_with(4);
        let (n, a, b, d) = (ids[0], ids[1], ids[2], ids[3]);

        engine.set_driver(a, Some(n)).unwrap();
        engine.set_driver(b, Some(n)).unwrap();
        assert_eq!(engine.node(n).unwrap().driver_list(), &[n, a, b]);

        engine.set_driver(n, Some(d)).unwrap();
        for id in [n, a, b] {
            assert_eq!(engine.node(id).unwrap().driver_node(), d);
        }
        assert_eq!(engine.node(d).unwrap().driver_list(), &[d, n, a, b]);
        assert!(engine.node(n).unwrap().driver_list().is_empty());

        let mut members = engine.graph_members(d).unwrap();
        members.sort();
        let mut expected = vec![n, a, b, d];
        expected.sort();
        assert_eq!(members, expected);
    }

    #[test]
    fn test_set_driver_back_to_self() {
        let (mut engine, ids) = engine_with(2);
        let (n, d) = (ids[0], ids[1]);

        engine.set_driver(n, Some(d)).unwrap();
        engine.set_driver(n, None).unwrap();

        assert_eq!(engine.node(n).unwrap().driver_node(), n);
        assert_eq!(engine.node(n).unwrap().driver_list(), &[n]);
        assert_eq!(engine.node(d).unwrap().driver_list(), &[d]);
        assert_eq!(engine.graph_members(n).unwrap(), vec![n]);
    }

    #[test]
    fn test_set_driver_unknown() {
        let (mut engine, ids) = engine_with(1);
        let missing = Uuid::new_v4();
        assert!(matches!(
            engine.set_driver(ids[0], Some(missing)),
            Err(NodeError::NotFound(id)) if id == missing
        ));
    }

    #[test]
    fn test_driver_property_reaches_data_loop() {
        let (mut engine, ids) = engine_with(1);
        let id = ids[0];
        let mut props = Properties::new();
        props.set(NODE_DRIVER, "true");
        engine.update_properties(id, &props).unwrap();
        assert!(engine.node(id).unwrap().is_driver());

        engine.process(id).unwrap();
        engine.process(id).unwrap();
        let q = engine.quantum(id).unwrap().unwrap();
        assert_eq!(q.position, u64::from(engine.config().quantum_size));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let (mut engine, ids) = engine_with(3);
        let (n, a, d) = (ids[0], ids[1], ids[2]);
        engine.set_driver(a, Some(n)).unwrap();
        engine.set_driver(n, Some(d)).unwrap();
        engine.register(n, None, Properties::new()).unwrap();
        assert_eq!(engine.registry().len(), 2);

        engine.destroy(n).unwrap();

        assert!(engine.node(n).is_none());
        assert!(!engine.is_scheduled(n).unwrap());
        assert!(engine.registry().is_empty());
        assert!(engine.registered_nodes().is_empty());
        assert_eq!(engine.node(d).unwrap().driver_list(), &[d, a]);
        assert_eq!(engine.node(a).unwrap().driver_node(), d);
    }
}
