//! Per-execution state and metadata.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verbena_node::{ExecutionSnapshot, OutputMap};

/// Published node outputs for one execution, keyed by node name. Cleared
/// at the start of every execution. Feeds downstream input assembly and
/// doubles as the observability surface.
#[derive(Debug, Default)]
pub struct ExecutionState {
  outputs: HashMap<String, OutputMap>,
}

impl ExecutionState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn clear(&mut self) {
    self.outputs.clear();
  }

  pub fn insert(&mut self, node: impl Into<String>, output: OutputMap) {
    self.outputs.insert(node.into(), output);
  }

  pub fn get(&self, node: &str) -> Option<&OutputMap> {
    self.outputs.get(node)
  }

  pub fn contains(&self, node: &str) -> bool {
    self.outputs.contains_key(node)
  }

  pub fn len(&self) -> usize {
    self.outputs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.outputs.is_empty()
  }

  /// Clone the full state for node contexts and reports.
  pub fn snapshot(&self) -> ExecutionSnapshot {
    self.outputs.clone()
  }
}

/// How a node's execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
  Completed,
  Failed,
  /// Canned output was published in place of running the node.
  Mocked,
}

/// Per-node, per-execution bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionMetadata {
  pub start_time: DateTime<Utc>,
  pub end_time: DateTime<Utc>,
  pub duration_ms: u64,
  pub status: ExecutionStatus,
  pub attempts: u32,
}

impl NodeExecutionMetadata {
  pub fn new(
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: ExecutionStatus,
    attempts: u32,
  ) -> Self {
    let duration_ms = (end_time - start_time).num_milliseconds().max(0) as u64;
    Self {
      start_time,
      end_time,
      duration_ms,
      status,
      attempts,
    }
  }
}
