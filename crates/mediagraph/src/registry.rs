//! Published objects and the observers bound to them
//!
//! Registering a node makes it a global with a numeric id; clients bind to
//! a global to get a resource, and each resource carries the observer that
//! receives info and param replies for that client.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::implementation::Param;
use crate::node::NodeInfo;
use crate::port::Direction;
use crate::properties::Properties;
use crate::NodeId;

pub type GlobalId = u32;
pub type ResourceId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GlobalKind {
    Node {
        node: NodeId,
    },
    Port {
        node: NodeId,
        direction: Direction,
        port_id: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Global {
    pub id: GlobalId,
    pub kind: GlobalKind,
    pub parent: Option<GlobalId>,
    pub props: Properties,
}

/// Client-side sink for a bound node.
#[allow(unused_variables)]
pub trait NodeObserver: Send {
    /// Info snapshot; `info.change_mask` says which fields changed.
    fn info(&self, info: &NodeInfo);
    /// One reply to a param enumeration.
    fn param(&self, seq: u32, param_id: u32, index: u32, next: u32, param: &Param) {}
    /// The binding is gone.
    fn destroyed(&self) {}
}

/// One client binding to a node.
pub struct Resource {
    id: ResourceId,
    observer: Box<dyn NodeObserver>,
}

impl Resource {
    pub(crate) fn new(id: ResourceId, observer: Box<dyn NodeObserver>) -> Self {
        Self { id, observer }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn observer(&self) -> &dyn NodeObserver {
        self.observer.as_ref()
    }

    pub(crate) fn destroy(self) {
        debug!(resource = self.id, "destroy resource");
        self.observer.destroyed();
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    globals: BTreeMap<GlobalId, Global>,
    next_global: GlobalId,
    next_resource: ResourceId,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: GlobalKind,
        parent: Option<GlobalId>,
        props: Properties,
    ) -> GlobalId {
        self.next_global += 1;
        let id = self.next_global;
        debug!(global = id, ?kind, "register global");
        self.globals.insert(
            id,
            Global {
                id,
                kind,
                parent,
                props,
            },
        );
        id
    }

    pub fn unregister(&mut self, id: GlobalId) -> Option<Global> {
        let global = self.globals.remove(&id);
        if global.is_some() {
            debug!(global = id, "unregister global");
        }
        global
    }

    pub fn get(&self, id: GlobalId) -> Option<&Global> {
        self.globals.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Global> {
        self.globals.values()
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    pub(crate) fn next_resource_id(&mut self) -> ResourceId {
        self.next_resource += 1;
        self.next_resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_register_and_unregister() {
        let node = Uuid::new_v4();
        let mut registry = Registry::new();

        let parent = registry.register(GlobalKind::Node { node }, None, Properties::new());
        let port = registry.register(
            GlobalKind::Port {
                node,
                direction: Direction::Input,
                port_id: 0,
            },
            Some(parent),
            Properties::new(),
        );

        assert_ne!(parent, port);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(port).unwrap().parent, Some(parent));

        assert!(registry.unregister(port).is_some());
        assert!(registry.unregister(port).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_global_serializes_kind() {
        let node = Uuid::new_v4();
        let mut registry = Registry::new();
        let id = registry.register(GlobalKind::Node { node }, None, Properties::new());

        let json = serde_json::to_value(registry.get(id).unwrap()).unwrap();
        assert_eq!(json["kind"]["type"], "node");
    }
}
