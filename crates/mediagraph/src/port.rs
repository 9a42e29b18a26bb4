//! Ports and the links attached to them

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::implementation::PortInfo;
use crate::properties::Properties;
use crate::registry::GlobalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format negotiation state of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortState {
    Init,
    /// No format; must be configured before streaming.
    Configure,
}

/// A connection between this port and a peer. The link subsystem owns it;
/// ports only hold handles.
pub trait Link: Send + Sync {
    fn activate(&self);
    fn deactivate(&self);
    /// Tear the link down. Called once per port during node teardown.
    fn unlink(&self);
    /// The consumer is done with `buffer_id`; hand it back upstream.
    fn reuse_buffer(&self, buffer_id: u32);
}

pub struct Port {
    direction: Direction,
    id: u32,
    state: PortState,
    multiplex: bool,
    properties: Properties,
    links: Vec<Arc<dyn Link>>,
    global: Option<GlobalId>,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("direction", &self.direction)
            .field("id", &self.id)
            .field("state", &self.state)
            .field("links", &self.links.len())
            .field("global", &self.global)
            .finish()
    }
}

impl Port {
    pub fn new(direction: Direction, id: u32, info: PortInfo) -> Self {
        Self {
            direction,
            id,
            state: PortState::Init,
            multiplex: info.multiplex,
            properties: info.props,
            links: Vec::new(),
            global: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn set_state(&mut self, state: PortState) {
        self.state = state;
    }

    pub fn multiplex(&self) -> bool {
        self.multiplex
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn global(&self) -> Option<GlobalId> {
        self.global
    }

    pub(crate) fn set_global(&mut self, global: Option<GlobalId>) {
        self.global = global;
    }

    /// A port with no links is free.
    pub fn is_free(&self) -> bool {
        self.links.is_empty()
    }

    pub fn links(&self) -> &[Arc<dyn Link>] {
        &self.links
    }

    pub fn add_link(&mut self, link: Arc<dyn Link>) {
        self.links.push(link);
    }

    pub fn remove_link(&mut self, link: &Arc<dyn Link>) -> bool {
        let before = self.links.len();
        self.links.retain(|l| !Arc::ptr_eq(l, link));
        self.links.len() != before
    }

    pub(crate) fn activate_links(&self) {
        for link in &self.links {
            link.activate();
        }
    }

    pub(crate) fn deactivate_links(&self) {
        for link in &self.links {
            link.deactivate();
        }
    }

    /// Unlink and drop every link handle.
    pub(crate) fn unlink(&mut self) {
        if !self.links.is_empty() {
            debug!(direction = %self.direction, port = self.id, links = self.links.len(), "unlink port");
        }
        for link in self.links.drain(..) {
            link.unlink();
        }
    }
}
