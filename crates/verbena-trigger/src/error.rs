//! Trigger errors.

use verbena_engine::EngineError;
use verbena_node::NodeError;

/// Errors surfaced by trigger activation.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
  /// Activation while the workflow was already running; the fire is
  /// dropped, the workflow is untouched.
  #[error("workflow already executing")]
  Rejected,

  /// The node handed to the trigger is not marked as a trigger.
  #[error("node '{name}' is not a trigger node")]
  NotATriggerNode { name: String },

  /// Schedule config failed validation.
  #[error("invalid schedule: {message}")]
  InvalidSchedule { message: String },

  /// `trigger` was called before a schedule was activated.
  #[error("no schedule activated")]
  NotActivated,

  /// Publishing the activation payload failed.
  #[error(transparent)]
  Node(#[from] NodeError),

  /// The execution itself failed.
  #[error(transparent)]
  Engine(#[from] EngineError),
}
