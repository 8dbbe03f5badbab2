//! Engine errors.

use verbena_node::NodeError;

/// Errors that abort or reject a workflow execution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// `execute` was called while the workflow was not idle.
  #[error("workflow already executing")]
  ExecutionRejected,

  /// The named entry node does not exist.
  #[error("unknown trigger node '{name}'")]
  UnknownTrigger { name: String },

  /// The named entry node exists but is not a trigger.
  #[error("node '{name}' is not a trigger")]
  NotATrigger { name: String },

  /// The dependency graph contains at least one cycle.
  #[error("workflow graph contains {} cycle(s)", cycles.len())]
  CycleDetected { cycles: Vec<Vec<String>> },

  /// A node failed without `continue_on_fail`; first fatal error wins.
  #[error("node '{name}' failed")]
  NodeFailed {
    name: String,
    #[source]
    source: NodeError,
  },

  /// The execution was cancelled.
  #[error("execution cancelled")]
  Cancelled,

  /// A dispatch task died (panicked or was aborted by the runtime).
  #[error("dispatch failure: {message}")]
  Dispatch { message: String },
}
