//! Media node: control-plane state, ports and the lifecycle state machine
//!
//! Everything here runs on the control thread. Operations that involve
//! other nodes or the data loop (driver changes, destroy) live on
//! [`Engine`](crate::engine::Engine), which calls into these methods.
//!
//! A state request issues the command and queues a completion; the state
//! field only moves when the completion runs (see [`Node::update_state`]).

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::engine::EngineConfig;
use crate::implementation::{
    Completion, ImplError, NodeCommand, NodeImplementation, Param, Processor,
};
use crate::listener::{ListenerId, Listeners, NodeListener};
use crate::port::{Direction, Port, PortState};
use crate::port_map::PortMap;
use crate::properties::{
    Properties, MEDIA_CLASS, NODE_DRIVER, NODE_ID, NODE_NAME, NODE_PAUSE_ON_IDLE, NODE_SESSION,
};
use crate::registry::{GlobalId, GlobalKind, Registry, Resource, ResourceId};
use crate::state::{ChangeMask, NodeState};
use crate::work_queue::WorkQueue;
use crate::NodeId;

/// Errors that can occur during node operations
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("node not found: {0}")]
    NotFound(NodeId),
    #[error("cannot request state {0}")]
    InvalidState(NodeState),
    #[error("node already registered")]
    AlreadyRegistered,
    #[error("node has no implementation")]
    NoImplementation,
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),
    #[error("implementation error: {0}")]
    Implementation(#[from] ImplError),
    #[error("data loop error: {0}")]
    Loop(#[from] crate::data_loop::LoopError),
    #[error("graph error: {0}")]
    Graph(#[from] crate::exec_graph::GraphError),
}

/// Published snapshot of a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfo {
    /// Global id, once registered.
    pub id: Option<GlobalId>,
    pub name: String,
    pub state: NodeState,
    pub error: Option<String>,
    pub props: Properties,
    #[serde(serialize_with = "serialize_mask")]
    pub change_mask: ChangeMask,
    pub n_input_ports: u32,
    pub max_input_ports: u32,
    pub n_output_ports: u32,
    pub max_output_ports: u32,
}

fn serialize_mask<S: serde::Serializer>(mask: &ChangeMask, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u32(mask.bits())
}

pub struct Node {
    id: NodeId,
    info: NodeInfo,
    active: bool,
    enabled: bool,
    driver: bool,
    pause_on_idle: bool,
    default_pause_on_idle: bool,
    remote: bool,
    /// The node clocking this one; itself when self-driving.
    pub(crate) driver_node: NodeId,
    /// Nodes this node clocks, itself included while self-driving.
    pub(crate) driver_list: Vec<NodeId>,
    input_ports: PortMap<Port>,
    output_ports: PortMap<Port>,
    registered: bool,
    global: Option<GlobalId>,
    resources: Vec<Resource>,
    work: WorkQueue<NodeId, NodeState>,
    listeners: Listeners,
    implementation: Option<Box<dyn NodeImplementation>>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        name: impl Into<String>,
        properties: Properties,
        config: &EngineConfig,
    ) -> Self {
        let name = name.into();
        debug!(node = %id, name = %name, "new node");

        let mut node = Self {
            id,
            info: NodeInfo {
                id: None,
                name,
                state: NodeState::Creating,
                error: None,
                props: properties,
                change_mask: ChangeMask::empty(),
                n_input_ports: 0,
                max_input_ports: 0,
                n_output_ports: 0,
                max_output_ports: 0,
            },
            active: false,
            enabled: true,
            driver: false,
            pause_on_idle: config.pause_on_idle,
            default_pause_on_idle: config.pause_on_idle,
            remote: false,
            driver_node: id,
            driver_list: vec![id],
            input_ports: PortMap::new(),
            output_ports: PortMap::new(),
            registered: false,
            global: None,
            resources: Vec::new(),
            work: WorkQueue::new(),
            listeners: Listeners::default(),
            implementation: None,
        };
        node.check_properties();
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn state(&self) -> NodeState {
        self.info.state
    }

    pub fn error(&self) -> Option<&str> {
        self.info.error.as_deref()
    }

    pub fn properties(&self) -> &Properties {
        &self.info.props
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_driver(&self) -> bool {
        self.driver
    }

    pub fn pause_on_idle(&self) -> bool {
        self.pause_on_idle
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn driver_node(&self) -> NodeId {
        self.driver_node
    }

    pub fn driver_list(&self) -> &[NodeId] {
        &self.driver_list
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn global(&self) -> Option<GlobalId> {
        self.global
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Completions still waiting for the implementation.
    pub fn pending_work(&self) -> usize {
        self.work.waiting()
    }

    pub fn ports(&self, direction: Direction) -> impl Iterator<Item = &Port> {
        self.port_map(direction).iter().map(|(_, p)| p)
    }

    pub fn port(&self, direction: Direction, port_id: u32) -> Option<&Port> {
        self.port_map(direction).get(port_id)
    }

    pub fn port_mut(&mut self, direction: Direction, port_id: u32) -> Option<&mut Port> {
        self.port_map_mut(direction).get_mut(port_id)
    }

    /// Both flags set: the node's processor may run.
    pub fn is_runnable(&self) -> bool {
        self.active && self.enabled
    }

    fn port_map(&self, direction: Direction) -> &PortMap<Port> {
        match direction {
            Direction::Input => &self.input_ports,
            Direction::Output => &self.output_ports,
        }
    }

    fn port_map_mut(&mut self, direction: Direction) -> &mut PortMap<Port> {
        match direction {
            Direction::Input => &mut self.input_ports,
            Direction::Output => &mut self.output_ports,
        }
    }

    pub(crate) fn add_listener(&mut self, listener: Arc<dyn NodeListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub(crate) fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    pub(crate) fn set_remote(&mut self, remote: bool) {
        self.remote = remote;
    }

    /// Re-read flags carried in properties. Returns true when the driver
    /// flag changed.
    fn check_properties(&mut self) -> bool {
        self.pause_on_idle = self
            .info
            .props
            .get_bool(NODE_PAUSE_ON_IDLE)
            .unwrap_or(self.default_pause_on_idle);

        let driver = self.info.props.get_bool(NODE_DRIVER).unwrap_or(false);
        let changed = driver != self.driver;
        self.driver = driver;
        debug!(node = %self.id, driver, pause_on_idle = self.pause_on_idle, "check properties");
        changed
    }

    /// Attach the implementation and merge its properties. Returns its
    /// processor for the data loop.
    pub(crate) fn set_implementation(
        &mut self,
        implementation: Box<dyn NodeImplementation>,
    ) -> Option<Arc<dyn Processor>> {
        let props = implementation.properties();
        let processor = implementation.processor();
        self.implementation = Some(implementation);
        if let Some(props) = props {
            self.update_properties(&props);
        }
        processor
    }

    /// Merge `props`, re-check flags and publish. Returns true when the
    /// driver flag changed.
    pub(crate) fn update_properties(&mut self, props: &Properties) -> bool {
        self.info.props.update(props);
        let driver_changed = self.check_properties();
        self.info.change_mask |= ChangeMask::PROPS;
        self.push_info();
        driver_changed
    }

    /// Emit info_changed and push the snapshot to every binding, then clear
    /// the change mask.
    fn push_info(&mut self) {
        let id = self.id;
        let info = &self.info;
        self.listeners.emit(|l| l.info_changed(id, info));
        for resource in &self.resources {
            resource.observer().info(info);
        }
        self.info.change_mask = ChangeMask::empty();
    }

    fn send_command(&mut self, command: NodeCommand) -> Result<Completion, NodeError> {
        let implementation = self
            .implementation
            .as_mut()
            .ok_or(NodeError::NoImplementation)?;
        Ok(implementation.send_command(command)?)
    }

    fn do_pause(&mut self) -> Result<Completion, NodeError> {
        debug!(node = %self.id, "pause node");
        let res = self.send_command(NodeCommand::Pause);
        if let Err(e) = &res {
            debug!(node = %self.id, "pause node error: {}", e);
        }
        res
    }

    /// Pause unless already at or below idle.
    pub(crate) fn pause(&mut self) -> Result<Completion, NodeError> {
        if self.info.state <= NodeState::Idle {
            return Ok(Completion::Done);
        }
        self.do_pause()
    }

    fn start(&mut self) -> Result<Completion, NodeError> {
        debug!(node = %self.id, "start node");
        let res = self.send_command(NodeCommand::Start);
        if let Err(e) = &res {
            debug!(node = %self.id, "start node error: {}", e);
        }
        res
    }

    /// Clear the format of every port and force it back to configure.
    /// Per-port failures are logged and skipped.
    fn suspend(&mut self) -> Completion {
        debug!(node = %self.id, "suspend node");
        for direction in [Direction::Input, Direction::Output] {
            let ids = self.port_map(direction).ids();
            for port_id in ids {
                if let Some(implementation) = self.implementation.as_mut() {
                    if let Err(e) = implementation.port_clear_format(direction, port_id) {
                        warn!(node = %self.id, %direction, port = port_id, "error unset format: {}", e);
                    }
                }
                if let Some(port) = self.port_map_mut(direction).get_mut(port_id) {
                    port.set_state(PortState::Configure);
                }
            }
        }
        Completion::Done
    }

    fn activate_links(&self) {
        debug!(node = %self.id, "activate");
        for direction in [Direction::Input, Direction::Output] {
            for (_, port) in self.port_map(direction).iter() {
                port.activate_links();
            }
        }
    }

    fn deactivate_links(&self) {
        debug!(node = %self.id, "deactivate");
        for direction in [Direction::Input, Direction::Output] {
            for (_, port) in self.port_map(direction).iter() {
                port.deactivate_links();
            }
        }
    }

    /// Request a state change. Issues the command for `state` and queues a
    /// completion that moves the node there once the command finishes.
    pub(crate) fn set_state(&mut self, state: NodeState) -> Result<(), NodeError> {
        let old = self.info.state;
        debug!(node = %self.id, from = %old, to = %state, "set state");

        if old == state {
            return Ok(());
        }

        let id = self.id;
        self.listeners.emit(|l| l.state_request(id, state));

        let completion = match state {
            NodeState::Creating => return Err(NodeError::InvalidState(state)),
            NodeState::Suspended => self.suspend(),
            NodeState::Idle => {
                if self.active {
                    Completion::Done
                } else {
                    self.pause()?
                }
            }
            NodeState::Running => {
                if self.active {
                    self.activate_links();
                    self.start()?
                } else {
                    Completion::Done
                }
            }
            NodeState::Error => Completion::Done,
        };

        self.work.add(id, completion, state);
        Ok(())
    }

    /// Record that the node reached `state`. No-op when already there.
    pub(crate) fn update_state(&mut self, state: NodeState, error: Option<String>) {
        let old = self.info.state;
        if old == state {
            return;
        }

        if state == NodeState::Error {
            error!(node = %self.id, from = %old, "update state -> error ({})", error.as_deref().unwrap_or(""));
        } else {
            debug!(node = %self.id, from = %old, to = %state, "update state");
        }

        if self.info.error != error {
            self.info.change_mask |= ChangeMask::ERROR;
        }
        self.info.error = error;
        self.info.state = state;

        if state == NodeState::Idle {
            if self.pause_on_idle {
                if let Err(e) = self.do_pause() {
                    warn!(node = %self.id, "pause on idle: {}", e);
                }
            }
            self.deactivate_links();
        }

        let id = self.id;
        let info = &self.info;
        self.listeners
            .emit(|l| l.state_changed(id, old, state, info.error.as_deref()));

        self.info.change_mask |= ChangeMask::STATE;
        self.push_info();
    }

    fn on_state_complete(&mut self, state: NodeState, result: Result<(), ImplError>) {
        debug!(node = %self.id, %state, ok = result.is_ok(), "state complete");
        match result {
            Ok(()) => self.update_state(state, None),
            Err(e) => self.update_state(
                NodeState::Error,
                Some(format!("error changing node state: {}", e)),
            ),
        }
    }

    /// The implementation finished request `seq`.
    pub(crate) fn on_done(&mut self, seq: u32, result: Result<(), ImplError>) {
        debug!(node = %self.id, seq, ok = result.is_ok(), "async complete");
        let id = self.id;
        self.listeners.emit(|l| l.async_complete(id, seq, &result));
        self.work.complete(id, seq, result);
    }

    /// Run completions that are ready. Returns how many ran.
    pub(crate) fn dispatch_work(&mut self) -> usize {
        let ready = self.work.take_ready();
        let count = ready.len();
        for item in ready {
            self.on_state_complete(item.work, item.result);
        }
        count
    }

    /// Returns true when the flag changed.
    pub(crate) fn set_active(&mut self, active: bool) -> bool {
        if self.active == active {
            return false;
        }
        debug!(node = %self.id, "{}", if active { "activate" } else { "deactivate" });
        self.active = active;
        let id = self.id;
        self.listeners.emit(|l| l.active_changed(id, active));

        if active {
            if self.enabled {
                self.activate_links();
            }
        } else if let Err(e) = self.set_state(NodeState::Idle) {
            warn!(node = %self.id, "idle on deactivate failed: {}", e);
        }
        true
    }

    /// Returns true when the flag changed.
    pub(crate) fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        debug!(node = %self.id, "{}", if enabled { "enable" } else { "disable" });
        self.enabled = enabled;
        let id = self.id;
        self.listeners.emit(|l| l.enabled_changed(id, enabled));

        if enabled {
            if self.active {
                self.activate_links();
            }
        } else if let Err(e) = self.set_state(NodeState::Suspended) {
            warn!(node = %self.id, "suspend on disable failed: {}", e);
        }
        true
    }

    pub(crate) fn emit_driver_changed(&self, driver: NodeId) {
        let id = self.id;
        self.listeners.emit(|l| l.driver_changed(id, driver));
    }

    /// Reconcile ports with what the implementation reports.
    pub(crate) fn update_ports(&mut self, registry: &mut Registry) -> Result<(), NodeError> {
        let implementation = self
            .implementation
            .as_ref()
            .ok_or(NodeError::NoImplementation)?;

        let counts = implementation.port_counts()?;
        let mut input_ids = implementation.port_ids(Direction::Input)?;
        let mut output_ids = implementation.port_ids(Direction::Output)?;

        if self.info.max_input_ports != counts.max_input {
            self.info.max_input_ports = counts.max_input;
            self.info.change_mask |= ChangeMask::INPUT_PORTS;
        }
        if self.info.max_output_ports != counts.max_output {
            self.info.max_output_ports = counts.max_output;
            self.info.change_mask |= ChangeMask::OUTPUT_PORTS;
        }

        debug!(
            node = %self.id,
            n_input = counts.n_input,
            max_input = counts.max_input,
            n_output = counts.n_output,
            max_output = counts.max_output,
            "update ports"
        );

        for ids in [&mut input_ids, &mut output_ids] {
            if !ids.windows(2).all(|w| w[0] < w[1]) {
                warn!(node = %self.id, "port ids not strictly ascending, sorting");
                ids.sort_unstable();
                ids.dedup();
            }
        }

        self.update_port_map(Direction::Input, &input_ids, registry);
        self.update_port_map(Direction::Output, &output_ids, registry);

        for direction in [Direction::Input, Direction::Output] {
            let (n_ports, max_ports) = self.port_counts(direction);
            if n_ports > max_ports {
                warn!(node = %self.id, %direction, n_ports, max_ports, "more ports than the new maximum, keeping them");
            }
        }

        if !self.info.change_mask.is_empty() {
            self.push_info();
        }
        Ok(())
    }

    /// Linear merge of the map's stored ids (`o`) against the ascending
    /// `ids` (`n`): stored ids below the next new id are stale, new ids not
    /// in the map are added. Empty stretches of the id space are skipped.
    fn update_port_map(&mut self, direction: Direction, ids: &[u32], registry: &mut Registry) {
        let mut o: u64 = 0;
        let mut n: usize = 0;

        loop {
            let next = ids.get(n).copied();
            let stale = self
                .port_map(direction)
                .stored_from(o)
                .next()
                .filter(|slot| next.map_or(true, |id| *slot < id));

            if let Some(slot) = stale {
                if let Some(port) = self.port_map_mut(direction).remove(slot) {
                    debug!(node = %self.id, %direction, port = slot, "port removed");
                    self.destroy_port(port, registry);
                }
                o = u64::from(slot) + 1;
            } else if let Some(id) = next {
                if self.port_map(direction).get(id).is_none() {
                    debug!(node = %self.id, %direction, port = id, "port added");
                    self.add_port(direction, id, registry);
                } else {
                    debug!(node = %self.id, %direction, port = id, "port unchanged");
                }
                o = u64::from(id) + 1;
                n += 1;
            } else {
                break;
            }
        }
    }

    fn add_port(&mut self, direction: Direction, port_id: u32, registry: &mut Registry) {
        let (n_ports, max_ports) = self.port_counts(direction);
        if n_ports >= max_ports {
            error!(node = %self.id, %direction, port = port_id, max_ports, "can't add port: limit reached");
            return;
        }

        let Some(implementation) = self.implementation.as_ref() else {
            return;
        };
        let info = match implementation.port_info(direction, port_id) {
            Ok(info) => info,
            Err(e) => {
                error!(node = %self.id, %direction, port = port_id, "can't add port: {}", e);
                return;
            }
        };

        let mut port = Port::new(direction, port_id, info);
        if let Some(parent) = self.global {
            let global = register_port(registry, self.id, parent, &port);
            port.set_global(Some(global));
        }
        self.port_map_mut(direction).insert_at(port_id, port);
        self.port_count_changed(direction);
    }

    fn destroy_port(&mut self, mut port: Port, registry: &mut Registry) {
        port.unlink();
        if let Some(global) = port.global() {
            registry.unregister(global);
        }
        self.port_count_changed(port.direction());
    }

    fn port_counts(&self, direction: Direction) -> (u32, u32) {
        match direction {
            Direction::Input => (self.info.n_input_ports, self.info.max_input_ports),
            Direction::Output => (self.info.n_output_ports, self.info.max_output_ports),
        }
    }

    fn port_count_changed(&mut self, direction: Direction) {
        let n = self.port_map(direction).len() as u32;
        match direction {
            Direction::Input => {
                self.info.n_input_ports = n;
                self.info.change_mask |= ChangeMask::INPUT_PORTS;
            }
            Direction::Output => {
                self.info.n_output_ports = n;
                self.info.change_mask |= ChangeMask::OUTPUT_PORTS;
            }
        }
    }

    /// Look up a port by id, or with `None` pick the first free port,
    /// falling back to the last multiplexing one.
    pub fn find_port(&self, direction: Direction, port_id: Option<u32>) -> Option<&Port> {
        let map = self.port_map(direction);
        match port_id {
            Some(id) => map.get(id),
            None => {
                let mut candidate = None;
                for (_, port) in map.iter() {
                    if port.is_free() {
                        return Some(port);
                    }
                    if port.multiplex() {
                        candidate = Some(port);
                    }
                }
                candidate
            }
        }
    }

    /// Reserve an unused port id, or `None` when the direction is full.
    pub(crate) fn get_free_port_id(&mut self, direction: Direction) -> Option<u32> {
        let (n_ports, max_ports) = self.port_counts(direction);
        debug!(node = %self.id, %direction, n_ports, max_ports, "get free port id");

        if n_ports >= max_ports {
            warn!(node = %self.id, %direction, "no more ports available");
            return None;
        }
        let Some(port_id) = self.port_map_mut(direction).reserve() else {
            warn!(node = %self.id, %direction, "port id space exhausted");
            return None;
        };
        debug!(node = %self.id, %direction, port = port_id, "free port");
        Some(port_id)
    }

    /// Hand a consumed buffer back through the links of input `port_id`.
    pub(crate) fn reuse_buffer(&self, port_id: u32, buffer_id: u32) {
        if let Some(port) = self.input_ports.get(port_id) {
            for link in port.links() {
                link.reuse_buffer(buffer_id);
            }
        }
    }

    /// Enumerate params from `start`, at most `max` of them (0 means no
    /// limit). `f` gets `(index, next, param)` per result.
    pub(crate) fn for_each_param<F>(
        &self,
        param_id: u32,
        start: u32,
        max: u32,
        mut f: F,
    ) -> Result<u32, NodeError>
    where
        F: FnMut(u32, u32, &Param),
    {
        let implementation = self
            .implementation
            .as_ref()
            .ok_or(NodeError::NoImplementation)?;
        let max = if max == 0 { u32::MAX } else { max };

        let mut index = start;
        let mut count = 0;
        while count < max {
            let current = index;
            match implementation.enum_params(param_id, &mut index)? {
                Some(param) => {
                    f(current, index, &param);
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    /// Publish the node and its ports, then move it to suspended.
    pub(crate) fn register(
        &mut self,
        registry: &mut Registry,
        parent: Option<GlobalId>,
        mut props: Properties,
    ) -> Result<GlobalId, NodeError> {
        debug!(node = %self.id, "register");
        if self.registered {
            return Err(NodeError::AlreadyRegistered);
        }

        if let Err(e) = self.update_ports(registry) {
            warn!(node = %self.id, "update ports on register: {}", e);
        }

        if let Some(class) = self.info.props.get(MEDIA_CLASS) {
            props.set(MEDIA_CLASS, class);
        }
        props.set(NODE_NAME, self.info.name.clone());
        if let Some(session) = self.info.props.get(NODE_SESSION) {
            props.set(NODE_SESSION, session);
        }

        self.registered = true;
        let global = registry.register(GlobalKind::Node { node: self.id }, parent, props);
        self.global = Some(global);
        self.info.id = Some(global);
        self.info.props.set(NODE_ID, global.to_string());

        let id = self.id;
        debug!(node = %id, "initialized");
        self.listeners.emit(|l| l.initialized(id));
        self.update_state(NodeState::Suspended, None);

        for direction in [Direction::Input, Direction::Output] {
            for (_, port) in self.port_map_mut(direction).iter_mut() {
                let port_global = register_port(registry, id, global, port);
                port.set_global(Some(port_global));
            }
        }
        Ok(global)
    }

    /// Add a binding; it immediately receives the full info.
    pub(crate) fn bind(&mut self, resource: Resource) {
        debug!(node = %self.id, resource = resource.id(), "bound");
        let pending = self.info.change_mask;
        self.info.change_mask = ChangeMask::all();
        resource.observer().info(&self.info);
        self.info.change_mask = pending;
        self.resources.push(resource);
    }

    pub(crate) fn unbind(&mut self, resource_id: ResourceId) -> Result<(), NodeError> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.id() == resource_id)
            .ok_or(NodeError::ResourceNotFound(resource_id))?;
        self.resources.remove(pos).destroy();
        Ok(())
    }

    pub(crate) fn param_to_resource(
        &self,
        resource_id: ResourceId,
        seq: u32,
        param_id: u32,
        start: u32,
        max: u32,
    ) -> Result<u32, NodeError> {
        let resource = self
            .resources
            .iter()
            .find(|r| r.id() == resource_id)
            .ok_or(NodeError::ResourceNotFound(resource_id))?;
        self.for_each_param(param_id, start, max, |index, next, param| {
            resource.observer().param(seq, param_id, index, next, param)
        })
    }

    pub(crate) fn emit_destroy(&self) {
        let id = self.id;
        self.listeners.emit(|l| l.destroy(id));
    }

    pub(crate) fn emit_free(&self) {
        let id = self.id;
        self.listeners.emit(|l| l.free(id));
    }

    /// Unlink every port in one pass, then destroy them all.
    pub(crate) fn teardown_ports(&mut self, registry: &mut Registry) {
        debug!(node = %self.id, "unlink ports");
        for direction in [Direction::Input, Direction::Output] {
            for (_, port) in self.port_map_mut(direction).iter_mut() {
                port.unlink();
            }
        }

        debug!(node = %self.id, "destroy ports");
        for direction in [Direction::Input, Direction::Output] {
            for port in self.port_map_mut(direction).drain() {
                self.destroy_port(port, registry);
            }
        }
    }

    /// Remove the global and destroy every binding.
    pub(crate) fn unpublish(&mut self, registry: &mut Registry) {
        if let Some(global) = self.global.take() {
            registry.unregister(global);
        }
        self.registered = false;
        for resource in self.resources.drain(..) {
            resource.destroy();
        }
    }

    /// Drop queued completions. Returns how many were dropped.
    pub(crate) fn cancel_work(&mut self) -> usize {
        self.work.cancel(self.id)
    }
}

fn register_port(registry: &mut Registry, node: NodeId, parent: GlobalId, port: &Port) -> GlobalId {
    registry.register(
        GlobalKind::Port {
            node,
            direction: port.direction(),
            port_id: port.id(),
        },
        Some(parent),
        port.properties().clone(),
    )
}
