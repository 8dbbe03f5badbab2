//! Node properties.

use serde::{Deserialize, Serialize};

use crate::retry::RetryDelay;

/// Static properties of a node instance.
///
/// `node_type` and `version` are taken from the node's behavior at
/// construction time, never from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProperties {
  pub id: String,
  pub name: String,
  pub node_type: String,
  pub version: u32,
  #[serde(default)]
  pub position: (f64, f64),
  #[serde(default)]
  pub disabled: bool,
  #[serde(default)]
  pub is_trigger: bool,
  #[serde(default)]
  pub retry_on_fail: bool,
  #[serde(default)]
  pub max_retries: u32,
  #[serde(default)]
  pub retry_delay: RetryDelay,
  #[serde(default)]
  pub continue_on_fail: bool,
}
