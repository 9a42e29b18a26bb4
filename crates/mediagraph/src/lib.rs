//! Mediagraph: runtime core of a real-time media graph
//!
//! Manages media nodes, their ports and their membership in driver graphs
//! that a data loop executes once per cycle. Two threads matter:
//!
//! - **Control**: owns the [`Engine`]; registration, properties, state
//!   requests and port reconciliation happen here.
//! - **Data loop**: owns the [`RtContext`](rt::RtContext); runs `process`
//!   callbacks and graph traversal. The control thread changes it only by
//!   submitting closures through the [`DataLoop`](data_loop::DataLoop).
//!
//! State changes are two-phase: [`Engine::set_state`] issues the command,
//! and the state moves when the completion runs in
//! [`Engine::dispatch_work`].
//!
//! The [`codecs`] module is a separate, smaller subsystem that loads and
//! orders codec descriptions from plugins.

pub mod clock;
pub mod codecs;
pub mod data_loop;
pub mod engine;
pub mod exec_graph;
pub mod implementation;
pub mod listener;
pub mod node;
pub mod port;
pub mod port_map;
pub mod properties;
pub mod registry;
pub mod rt;
pub mod state;
pub mod work_queue;

/// Stable node identity.
pub type NodeId = uuid::Uuid;

pub use clock::{Clock, ClockReading, Quantum};
pub use codecs::{Codec, CodecError, CodecKind, CodecSet, PluginLoader};
pub use data_loop::{DataLoop, LoopError, LoopHandle};
pub use engine::{Engine, EngineConfig};
pub use exec_graph::{ExecGraph, GraphError};
pub use implementation::{
    Completion, ImplError, NodeCommand, NodeImplementation, Param, PortCounts, PortInfo,
    ProcessStatus, Processor,
};
pub use listener::{ListenerId, NodeEvent, NodeListener};
pub use node::{Node, NodeError, NodeInfo};
pub use port::{Direction, Link, Port, PortState};
pub use port_map::PortMap;
pub use properties::Properties;
pub use registry::{Global, GlobalId, GlobalKind, NodeObserver, Registry, ResourceId};
pub use rt::RtContext;
pub use state::{ChangeMask, NodeState};
pub use work_queue::WorkQueue;
