//! The manual trigger.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use verbena_engine::{Engine, EngineError, ExecutionNotifier, ExecutionReport, NoopNotifier};
use verbena_node::{
  DataType, Node, NodeBehavior, NodeContext, OutputMap, Port, ProcessError, SharedNode,
};
use verbena_workflow::WorkflowState;

use crate::TRIGGER_OUTPUT_PORT;
use crate::error::TriggerError;

/// Behavior backing manual trigger nodes. Triggers publish instead of
/// processing; the engine never calls this hook.
pub struct ManualTriggerBehavior;

#[async_trait]
impl NodeBehavior for ManualTriggerBehavior {
  fn type_name(&self) -> &str {
    "manual-trigger"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    _ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    Err(ProcessError::new("trigger nodes are not processed"))
  }
}

/// Programmatic workflow activation.
///
/// `trigger` publishes the payload on the trigger node's output port,
/// applies the idle gate and drives the engine to completion.
pub struct ManualTrigger<N: ExecutionNotifier = NoopNotifier> {
  node: SharedNode,
  engine: Arc<Engine<N>>,
}

impl ManualTriggerBehavior {
  /// Build a trigger node wired for this behavior.
  pub fn node(name: impl Into<String>) -> Node {
    Node::new(name, Arc::new(ManualTriggerBehavior))
      .with_outputs(vec![Port::new(TRIGGER_OUTPUT_PORT, DataType::Any)])
      .as_trigger()
  }
}

impl<N: ExecutionNotifier> ManualTrigger<N> {
  /// Wire a trigger to its node and engine. The node must carry the
  /// trigger flag.
  pub fn new(node: SharedNode, engine: Arc<Engine<N>>) -> Result<Self, TriggerError> {
    if !node.is_trigger() {
      return Err(TriggerError::NotATriggerNode {
        name: node.name().to_string(),
      });
    }
    Ok(Self { node, engine })
  }

  /// Activate the workflow with an optional payload.
  ///
  /// Returns `Rejected` without touching the workflow if an execution is
  /// already in flight.
  pub async fn trigger(
    &self,
    data: Option<serde_json::Value>,
  ) -> Result<ExecutionReport, TriggerError> {
    if self.engine.workflow().state() == WorkflowState::Running {
      return Err(TriggerError::Rejected);
    }

    let payload = data.unwrap_or_else(|| serde_json::json!({}));
    self.node.publish_output(TRIGGER_OUTPUT_PORT, payload)?;

    info!(trigger = self.node.name(), "manual trigger fired");
    match self.engine.execute(self.node.name(), None).await {
      Ok(report) => Ok(report),
      // The engine's gate is the authoritative one; a lost race surfaces
      // as the same rejection the pre-check gives.
      Err(EngineError::ExecutionRejected) => Err(TriggerError::Rejected),
      Err(other) => Err(other.into()),
    }
  }

  pub fn node(&self) -> &SharedNode {
    &self.node
  }
}
