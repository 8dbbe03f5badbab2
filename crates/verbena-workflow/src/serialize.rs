//! Workflow export and import.
//!
//! The export record carries the definition only - no runtime execution
//! state. Import re-instantiates each node through the type registry and
//! rebuilds the reverse link index by replaying `linksBySource`, so every
//! link is re-validated on the way in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use verbena_node::{Node, NodeProperties, NodeTypeRegistry, OutputMap, Port};

use crate::error::WorkflowError;
use crate::link::LinksBySource;
use crate::workflow::{Workflow, WorkflowSettings};

pub const FORMAT_VERSION: u32 = 1;

/// One serialized node: definition, never runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExport {
  pub properties: NodeProperties,
  pub config: serde_json::Value,
  pub inputs: Vec<Port>,
  pub outputs: Vec<Port>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub annotation: Option<String>,
}

/// The workflow export record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExport {
  pub version: u32,
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub nodes: Vec<NodeExport>,
  pub links_by_source: LinksBySource,
  pub settings: WorkflowSettings,
  #[serde(default)]
  pub static_data: HashMap<String, serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mock_data: Option<HashMap<String, OutputMap>>,
}

impl Workflow {
  /// Produce the serializable definition of this workflow.
  pub fn export(&self) -> WorkflowExport {
    let mut nodes: Vec<NodeExport> = self
      .nodes()
      .map(|(_, node)| NodeExport {
        properties: node.properties().clone(),
        config: node.config(),
        inputs: node.inputs().to_vec(),
        outputs: node.outputs().to_vec(),
        annotation: node.annotation().map(|a| a.to_string()),
      })
      .collect();
    nodes.sort_by(|a, b| a.properties.name.cmp(&b.properties.name));

    let mock_data = self.mock_data_all();
    WorkflowExport {
      version: FORMAT_VERSION,
      id: self.id().to_string(),
      name: self.name().map(|n| n.to_string()),
      nodes,
      links_by_source: self.links_by_source().clone(),
      settings: self.settings().clone(),
      static_data: self.static_data_snapshot(),
      mock_data: (!mock_data.is_empty()).then(|| mock_data.clone()),
    }
  }

  /// Rebuild a workflow from an export record, instantiating each node
  /// through the registry keyed by `(nodeType, version)`. Unknown types
  /// fail loudly.
  ///
  /// Links are replayed from `linksBySource` sorted by source node and
  /// port, so the fan-in order after import is deterministic.
  pub fn import(
    export: WorkflowExport,
    registry: &NodeTypeRegistry,
  ) -> Result<Workflow, WorkflowError> {
    if export.version != FORMAT_VERSION {
      return Err(WorkflowError::UnsupportedVersion {
        version: export.version,
      });
    }

    let mut workflow = Workflow::new(export.id).with_settings(export.settings);
    if let Some(name) = export.name {
      workflow = workflow.with_name(name);
    }

    for node_export in export.nodes {
      let behavior = registry
        .get(
          &node_export.properties.node_type,
          Some(node_export.properties.version),
        )
        .ok_or_else(|| WorkflowError::UnknownNodeType {
          name: node_export.properties.name.clone(),
          node_type: node_export.properties.node_type.clone(),
          version: node_export.properties.version,
        })?;
      workflow.add_node(Node::from_parts(
        node_export.properties,
        node_export.config,
        node_export.inputs,
        node_export.outputs,
        node_export.annotation,
        behavior,
      ))?;
    }

    let mut sources: Vec<_> = export.links_by_source.iter().collect();
    sources.sort_by(|a, b| a.0.cmp(b.0));
    for (source, ports) in sources {
      let mut ports: Vec<_> = ports.iter().collect();
      ports.sort_by(|a, b| a.0.cmp(b.0));
      for (source_port, links) in ports {
        for link in links {
          workflow.link_nodes(source, source_port, &link.target_node, &link.target_port)?;
        }
      }
    }

    workflow.restore_static_data(export.static_data);
    if let Some(mock_data) = export.mock_data {
      workflow.restore_mock_data(mock_data);
    }
    Ok(workflow)
  }
}
