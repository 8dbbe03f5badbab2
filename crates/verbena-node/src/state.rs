//! Node lifecycle states.

use serde::{Deserialize, Serialize};

/// The node state machine: `Idle -> Running -> {Completed, Failed}`.
/// `reset` returns a non-trigger node to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
  #[default]
  Idle,
  Running,
  Completed,
  Failed,
}

impl NodeState {
  pub fn is_terminal(self) -> bool {
    matches!(self, NodeState::Completed | NodeState::Failed)
  }
}

impl std::fmt::Display for NodeState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      NodeState::Idle => "idle",
      NodeState::Running => "running",
      NodeState::Completed => "completed",
      NodeState::Failed => "failed",
    };
    f.write_str(name)
  }
}
