//! Shared node builders for graph tests.

use std::sync::Arc;

use async_trait::async_trait;

use verbena_node::{
  DataType, Node, NodeBehavior, NodeContext, OutputMap, Port, ProcessError,
};

/// Passes its single input through unchanged.
pub struct PassBehavior;

#[async_trait]
impl NodeBehavior for PassBehavior {
  fn type_name(&self) -> &str {
    "pass"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    let value = ctx.input.get("input").cloned().unwrap_or(serde_json::Value::Null);
    Ok([("output".to_string(), value)].into())
  }
}

/// A node with only an `output` port.
pub fn source(name: &str) -> Node {
  Node::new(name, Arc::new(PassBehavior)).with_outputs(vec![Port::new("output", DataType::Any)])
}

/// A node with only an `input` port.
pub fn sink(name: &str) -> Node {
  Node::new(name, Arc::new(PassBehavior)).with_inputs(vec![Port::new("input", DataType::Any)])
}

/// A node with an `input` and an `output` port.
pub fn transform(name: &str) -> Node {
  Node::new(name, Arc::new(PassBehavior))
    .with_inputs(vec![Port::new("input", DataType::Any)])
    .with_outputs(vec![Port::new("output", DataType::Any)])
}

/// A trigger node with an `output` port.
pub fn trigger(name: &str) -> Node {
  source(name).as_trigger()
}
