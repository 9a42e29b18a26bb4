//! Contracts for the code that does a node's actual media work
//!
//! A node is a control-plane shell around a [`NodeImplementation`]. The shell
//! asks the implementation for commands, port layout and parameters; the
//! per-cycle work runs on the data loop through the implementation's
//! [`Processor`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Quantum;
use crate::port::Direction;
use crate::properties::Properties;

/// Errors reported by an implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImplError {
    #[error("operation not supported")]
    NotSupported,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no such port: {direction} {port_id}")]
    NoSuchPort { direction: Direction, port_id: u32 },
    #[error("{0}")]
    Failed(String),
}

/// Commands the control plane sends to an implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCommand {
    Pause,
    Start,
}

/// How an accepted request finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Already done.
    Done,
    /// Will finish later with a `done(seq, result)` callback.
    Pending(u32),
}

/// Current and maximum port counts per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCounts {
    pub n_input: u32,
    pub max_input: u32,
    pub n_output: u32,
    pub max_output: u32,
}

/// Static description of a port, queried when the port is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    /// Several links may share the port.
    pub multiplex: bool,
    pub props: Properties,
}

/// One enumerated parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub id: u32,
    pub value: serde_json::Value,
}

/// Result of one processing step on the data loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Output is ready; dependents may run.
    Done,
    /// Work continues elsewhere; the node signals completion by calling
    /// process again, which triggers its vertex.
    Async,
}

/// Per-cycle work, called on the data loop thread.
pub trait Processor: Send + Sync {
    fn process(&self, quantum: &Quantum) -> ProcessStatus;
}

/// The media implementation behind a node.
pub trait NodeImplementation: Send {
    fn send_command(&mut self, command: NodeCommand) -> Result<Completion, ImplError>;

    fn port_counts(&self) -> Result<PortCounts, ImplError>;

    /// Live port ids for `direction` in strictly ascending order.
    fn port_ids(&self, direction: Direction) -> Result<Vec<u32>, ImplError>;

    fn port_info(&self, direction: Direction, port_id: u32) -> Result<PortInfo, ImplError>;

    /// Drop the negotiated format of a port.
    fn port_clear_format(&mut self, direction: Direction, port_id: u32) -> Result<(), ImplError>;

    /// Cursor protocol: return the param at `*index` and advance `*index`
    /// to the next position, or `Ok(None)` when exhausted.
    fn enum_params(&self, param_id: u32, index: &mut u32) -> Result<Option<Param>, ImplError>;

    /// Properties merged into the node when the implementation is attached.
    fn properties(&self) -> Option<Properties> {
        None
    }

    fn processor(&self) -> Option<Arc<dyn Processor>> {
        None
    }
}
