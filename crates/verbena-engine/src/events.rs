//! Execution events and notifiers for observability.
//!
//! Events are emitted during workflow execution to allow consumers to
//! observe progress, persist state, stream to UIs, etc. Storage itself is
//! external; this is the hook.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// Workflow execution has started.
  WorkflowStarted {
    execution_id: String,
    workflow_id: String,
  },

  /// A node has started executing.
  NodeStarted {
    execution_id: String,
    node: String,
  },

  /// A node has completed successfully (or was mocked).
  NodeCompleted {
    execution_id: String,
    node: String,
  },

  /// A node has failed. Emitted whether or not the failure was absorbed
  /// by `continue_on_fail`.
  NodeFailed {
    execution_id: String,
    node: String,
    error: String,
  },

  /// A disabled node was skipped.
  NodeSkipped {
    execution_id: String,
    node: String,
  },

  /// Workflow execution has completed successfully.
  WorkflowCompleted { execution_id: String },

  /// Workflow execution has failed.
  WorkflowFailed { execution_id: String, error: String },

  /// Workflow execution was cancelled.
  WorkflowCancelled { execution_id: String },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event - implementations decide what
/// to do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {
    // Intentionally empty
  }
}

/// A notifier that sends events to an unbounded channel.
///
/// Use this when events are consumed asynchronously (e.g. persisted to a
/// database or streamed over a websocket).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never blocks the engine. Event volume is
  // low (a handful per node), so memory growth is unlikely in practice.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
