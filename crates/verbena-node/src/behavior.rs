//! The polymorphic node hook.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{NodeError, ProcessError};

/// Output of one node: produced records keyed by output port name. A value
/// is either a single record or an ordered sequence of records.
pub type OutputMap = HashMap<String, serde_json::Value>;

/// A read-only snapshot of the execution state: node name -> output map.
pub type ExecutionSnapshot = HashMap<String, OutputMap>;

/// Everything a node sees while processing.
#[derive(Debug, Clone, Default)]
pub struct NodeContext {
  /// Assembled input, keyed by input port. A port fed by one upstream link
  /// carries the record as-is; a port fed by several carries an ordered
  /// sequence; a port with no contributions is absent.
  pub input: HashMap<String, serde_json::Value>,
  /// Snapshot of all outputs published so far in this execution.
  pub state: ExecutionSnapshot,
  /// Cooperative cancellation signal; check it at I/O boundaries.
  pub cancel: CancellationToken,
}

impl NodeContext {
  pub fn new(input: HashMap<String, serde_json::Value>, state: ExecutionSnapshot) -> Self {
    Self {
      input,
      state,
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }
}

/// What a concrete node type implements.
///
/// Implementations are stateless from the engine's point of view: the same
/// behavior instance may back every node of its type.
#[async_trait]
pub trait NodeBehavior: Send + Sync {
  /// Registry key for this node type.
  fn type_name(&self) -> &str;

  /// Node type version. Multiple versions of one type may coexist in the
  /// registry.
  fn version(&self) -> u32 {
    1
  }

  /// JSON schema the node's config is validated against, if any.
  fn config_schema(&self) -> Option<serde_json::Value> {
    None
  }

  /// Domain validation layered on top of the schema check.
  fn validate_config(&self, _config: &serde_json::Value) -> Result<(), NodeError> {
    Ok(())
  }

  /// Produce output from the assembled input. `config` has secret
  /// references already substituted.
  async fn process(
    &self,
    config: &serde_json::Value,
    ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError>;
}
