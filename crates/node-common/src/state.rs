//! Node lifecycle state machine.
//!
//! BOOT → INIT → ONLINE ⇄ LINK_DOWN, with FAULT for a failed bring-up and
//! STOPPED on shutdown.

use crate::error::{NodeError, NodeResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Power-on; nothing touched yet.
    #[default]
    Boot,
    /// Controller reset, identified and configured.
    Init,
    /// Serving requests.
    Online,
    /// PHY link lost; socket closed until it returns.
    LinkDown,
    /// Bring-up failed.
    Fault,
    /// Loop exited.
    Stopped,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::Init => write!(f, "INIT"),
            Self::Online => write!(f, "ONLINE"),
            Self::LinkDown => write!(f, "LINK_DOWN"),
            Self::Fault => write!(f, "FAULT"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl NodeState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: NodeState) -> bool {
        use NodeState::{Boot, Fault, Init, LinkDown, Online, Stopped};

        matches!(
            (self, target),
            (Boot, Init)
                | (Init, Online)
                | (Online, LinkDown)
                | (LinkDown, Online)
                | (Boot | Init, Fault)
                | (Init | Online | LinkDown | Fault, Stopped)
        )
    }

    /// True while the loop is serving or waiting for the link.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Online | Self::LinkDown)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: NodeState,
    previous: Option<NodeState>,
    transition_count: u64,
}

impl StateMachine {
    /// Start in BOOT.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        self.current
    }

    /// State before the last transition.
    #[must_use]
    pub fn previous_state(&self) -> Option<NodeState> {
        self.previous
    }

    /// Number of transitions taken.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: NodeState) -> NodeResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(NodeError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bring_up_and_link_flaps() {
        let mut sm = StateMachine::new();
        sm.transition(NodeState::Init).unwrap();
        sm.transition(NodeState::Online).unwrap();
        sm.transition(NodeState::LinkDown).unwrap();
        sm.transition(NodeState::Online).unwrap();

        assert_eq!(sm.state(), NodeState::Online);
        assert_eq!(sm.previous_state(), Some(NodeState::LinkDown));
        assert_eq!(sm.transition_count(), 4);
        assert!(sm.state().is_running());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut sm = StateMachine::new();
        let err = sm.transition(NodeState::Online).unwrap_err();
        assert_eq!(
            err,
            NodeError::InvalidStateTransition {
                from: "BOOT".into(),
                to: "ONLINE".into()
            }
        );
        assert_eq!(sm.state(), NodeState::Boot);
    }

    #[test]
    fn test_fault_only_during_bring_up() {
        assert!(NodeState::Init.can_transition_to(NodeState::Fault));
        assert!(!NodeState::Online.can_transition_to(NodeState::Fault));
        assert!(NodeState::Fault.can_transition_to(NodeState::Stopped));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&NodeState::LinkDown).unwrap();
        assert_eq!(json, "\"LINK_DOWN\"");
    }
}
