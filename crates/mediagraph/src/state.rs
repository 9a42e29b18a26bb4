//! Node lifecycle states and info change tracking

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a node.
///
/// Variants are declared in ascending order so comparisons like
/// `state <= NodeState::Idle` read as "at or below idle".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Error,
    Creating,
    Suspended,
    Idle,
    Running,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Error => "error",
            NodeState::Creating => "creating",
            NodeState::Suspended => "suspended",
            NodeState::Idle => "idle",
            NodeState::Running => "running",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Which fields of a [`NodeInfo`](crate::node::NodeInfo) changed since it
    /// was last published.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangeMask: u32 {
        const INPUT_PORTS = 1 << 0;
        const OUTPUT_PORTS = 1 << 1;
        const STATE = 1 << 2;
        const PROPS = 1 << 3;
        const NAME = 1 << 4;
        const ERROR = 1 << 5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(NodeState::Error < NodeState::Creating);
        assert!(NodeState::Creating < NodeState::Suspended);
        assert!(NodeState::Suspended <= NodeState::Idle);
        assert!(NodeState::Running > NodeState::Idle);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&NodeState::Suspended).unwrap();
        assert_eq!(json, "\"suspended\"");
        assert_eq!(NodeState::Running.to_string(), "running");
    }

    #[test]
    fn test_change_mask_all() {
        let all = ChangeMask::all();
        assert!(all.contains(ChangeMask::STATE | ChangeMask::PROPS));
        assert!(ChangeMask::default().is_empty());
    }
}
