//! Node state definitions.

/// Node operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Node is starting up.
    Starting,
    /// Node is running and accepting submissions.
    Running,
    /// Node is draining its queue, not accepting new submissions.
    ShuttingDown,
    /// Node is stopped.
    Stopped,
}

impl NodeState {
    /// Check if the node is accepting new submissions.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, NodeState::Running)
    }

    /// Check if the node is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_accepts() {
        assert!(NodeState::Running.accepts_requests());
        assert!(!NodeState::Starting.accepts_requests());
        assert!(!NodeState::ShuttingDown.accepts_requests());
        assert!(NodeState::Stopped.is_terminal());
    }
}
