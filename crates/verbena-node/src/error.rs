//! Node errors and the per-node failure record.

use serde::{Deserialize, Serialize};

use crate::state::NodeState;
use verbena_secret::SecretError;

/// Error raised by `NodeBehavior::process`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProcessError {
  pub message: String,
}

impl ProcessError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Errors surfaced by the node base.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  /// Config failed the schema or a domain check.
  #[error("invalid config for node '{name}': {message}")]
  Validation { name: String, message: String },

  /// `run` was called outside the `Idle` state.
  #[error("node '{name}' cannot run in state {state}")]
  NotIdle { name: String, state: NodeState },

  /// `run` was called on a disabled node.
  #[error("node '{name}' is disabled")]
  Disabled { name: String },

  /// A port name was referenced that the node does not declare.
  #[error("node '{name}' has no output port '{port}'")]
  UnknownOutputPort { name: String, port: String },

  /// A secret reference could not be resolved.
  #[error("node '{name}' secret resolution failed")]
  Secret {
    name: String,
    #[source]
    source: SecretError,
  },

  /// `process` failed terminally after the retry policy was exhausted.
  #[error("node '{name}' failed after {attempts} attempt(s): {message}")]
  Processing {
    name: String,
    attempts: u32,
    message: String,
  },

  /// Registry already holds this (type, version) pair.
  #[error("node type '{node_type}' version {version} is already registered")]
  TypeAlreadyRegistered { node_type: String, version: u32 },
}

/// The error-propagation record for a failed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFailure {
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stack: Option<String>,
  pub node_id: String,
  pub node_name: String,
}

impl NodeFailure {
  pub fn new(node_id: impl Into<String>, node_name: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      stack: None,
      node_id: node_id.into(),
      node_name: node_name.into(),
    }
  }
}
