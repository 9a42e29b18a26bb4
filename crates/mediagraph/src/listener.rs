//! Node event fan-out
//!
//! Listeners are shared with the data loop (process and finish are emitted
//! there), so they must be `Send + Sync`. Every method has an empty default;
//! implement only what you need.

use std::sync::Arc;

use crate::implementation::ImplError;
use crate::node::NodeInfo;
use crate::state::NodeState;
use crate::NodeId;

/// Events an implementation raises outside of command completion.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Error(String),
    Buffering,
    RequestRefresh,
    Custom {
        id: u32,
        body: serde_json::Value,
    },
}

#[allow(unused_variables)]
pub trait NodeListener: Send + Sync {
    fn initialized(&self, node: NodeId) {}
    fn state_request(&self, node: NodeId, state: NodeState) {}
    fn state_changed(&self, node: NodeId, old: NodeState, new: NodeState, error: Option<&str>) {}
    fn active_changed(&self, node: NodeId, active: bool) {}
    fn enabled_changed(&self, node: NodeId, enabled: bool) {}
    fn driver_changed(&self, node: NodeId, driver: NodeId) {}
    fn info_changed(&self, node: NodeId, info: &NodeInfo) {}
    fn async_complete(&self, node: NodeId, seq: u32, result: &Result<(), ImplError>) {}
    fn event(&self, node: NodeId, event: &NodeEvent) {}
    /// Data loop thread.
    fn process(&self, node: NodeId) {}
    /// Data loop thread, after a driver's graph finished a cycle.
    fn finish(&self, node: NodeId) {}
    fn free(&self, node: NodeId) {}
    fn destroy(&self, node: NodeId) {}
}

pub type ListenerId = u64;

/// Ordered listener list. Emission order is registration order.
#[derive(Default)]
pub struct Listeners {
    entries: Vec<(ListenerId, Arc<dyn NodeListener>)>,
    next_id: ListenerId,
}

impl Listeners {
    pub fn add(&mut self, listener: Arc<dyn NodeListener>) -> ListenerId {
        self.next_id += 1;
        self.entries.push((self.next_id, listener));
        self.next_id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(lid, _)| *lid != id);
        self.entries.len() != before
    }

    pub fn emit(&self, mut f: impl FnMut(&dyn NodeListener)) {
        for (_, listener) in &self.entries {
            f(listener.as_ref());
        }
    }

    /// Immutable copy handed to the data loop.
    pub fn snapshot(&self) -> Arc<[Arc<dyn NodeListener>]> {
        self.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl NodeListener for Recorder {
        fn destroy(&self, _node: NodeId) {
            self.log.lock().unwrap().push(self.tag);
        }
    }

    #[test]
    fn test_emit_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::default();
        listeners.add(Arc::new(Recorder { tag: "a", log: log.clone() }));
        let b = listeners.add(Arc::new(Recorder { tag: "b", log: log.clone() }));
        listeners.add(Arc::new(Recorder { tag: "c", log: log.clone() }));

        let node = Uuid::new_v4();
        listeners.emit(|l| l.destroy(node));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);

        assert!(listeners.remove(b));
        log.lock().unwrap().clear();
        listeners.emit(|l| l.destroy(node));
        assert_eq!(*log.lock().unwrap(), vec!["a", "c"]);
        assert_eq!(listeners.snapshot().len(), 2);
    }
}
