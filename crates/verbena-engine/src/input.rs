//! Input assembly.
//!
//! For each input port of a node, upstream contributions are read from
//! execution state in link creation order. One contribution passes
//! through as a single record; several combine into an ordered sequence;
//! a port with none is simply absent from the input.

use std::collections::HashMap;

use verbena_node::Node;
use verbena_workflow::Workflow;

use crate::state::ExecutionState;

/// Assemble the per-port input for a node from upstream outputs.
pub fn assemble_input(
  workflow: &Workflow,
  state: &ExecutionState,
  node: &Node,
) -> HashMap<String, serde_json::Value> {
  let mut input = HashMap::new();

  for port in node.inputs() {
    let mut contributions: Vec<serde_json::Value> = Vec::new();
    for link in workflow.incoming_links(node.name(), &port.name) {
      let upstream = state
        .get(&link.source_node)
        .and_then(|output| output.get(&link.source_port));
      if let Some(value) = upstream {
        contributions.push(value.clone());
      }
    }

    match contributions.len() {
      0 => {}
      1 => {
        input.insert(port.name.clone(), contributions.remove(0));
      }
      _ => {
        input.insert(port.name.clone(), serde_json::Value::Array(contributions));
      }
    }
  }

  input
}
