//! Directed links between node ports.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use verbena_node::LinkType;

/// Forward entry: where a source output port feeds into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
  pub target_node: String,
  pub target_port: String,
  #[serde(default)]
  pub link_type: LinkType,
}

/// Reverse entry: where a target input port is fed from. Kept in link
/// creation order, which fixes the combination order during input
/// assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRef {
  pub source_node: String,
  pub source_port: String,
  #[serde(default)]
  pub link_type: LinkType,
}

/// source node -> source output port -> links, in creation order.
pub type LinksBySource = HashMap<String, HashMap<String, Vec<Link>>>;

/// target node -> target input port -> link origins, in creation order.
pub type LinksByTarget = HashMap<String, HashMap<String, Vec<LinkRef>>>;
