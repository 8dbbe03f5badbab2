//! The workflow container.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use verbena_node::{Node, OutputMap, SharedNode};

use crate::error::{LinkError, WorkflowError};
use crate::link::{Link, LinkRef, LinksBySource, LinksByTarget};

/// Recognized workflow settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
  /// Reserved timezone override for schedule arithmetic; stored but
  /// currently inert - all time math is UTC.
  pub timezone: String,
  /// Concurrency cap within one level; 0 means unlimited.
  pub max_parallel_executions: usize,
  /// When false, levels are executed sequentially.
  pub enable_parallel_execution: bool,
}

impl Default for WorkflowSettings {
  fn default() -> Self {
    Self {
      timezone: "UTC".to_string(),
      max_parallel_executions: 0,
      enable_parallel_execution: true,
    }
  }
}

/// The workflow state machine: `Idle -> Running -> {Completed, Failed}`,
/// with `reset` returning terminal states to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
  #[default]
  Idle,
  Running,
  Completed,
  Failed,
}

/// A user-defined graph of processing nodes.
///
/// Triggers and regular nodes share the same container; triggers are
/// distinguished only by their `is_trigger` flag. The two link indices are
/// kept mutually inverse by every mutation.
pub struct Workflow {
  id: String,
  name: Option<String>,
  nodes: HashMap<String, SharedNode>,
  links_by_source: LinksBySource,
  links_by_target: LinksByTarget,
  settings: WorkflowSettings,
  static_data: Mutex<HashMap<String, serde_json::Value>>,
  mock_data: HashMap<String, OutputMap>,
  state: Mutex<WorkflowState>,
}

impl Workflow {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: None,
      nodes: HashMap::new(),
      links_by_source: LinksBySource::new(),
      links_by_target: LinksByTarget::new(),
      settings: WorkflowSettings::default(),
      static_data: Mutex::new(HashMap::new()),
      mock_data: HashMap::new(),
      state: Mutex::new(WorkflowState::Idle),
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn settings(&self) -> &WorkflowSettings {
    &self.settings
  }

  pub fn set_settings(&mut self, settings: WorkflowSettings) {
    self.settings = settings;
  }

  /// Add a node under its unique name.
  pub fn add_node(&mut self, node: Node) -> Result<SharedNode, WorkflowError> {
    let name = node.name().to_string();
    if self.nodes.contains_key(&name) {
      return Err(WorkflowError::DuplicateNode { name });
    }
    let shared: SharedNode = Arc::new(node);
    self.nodes.insert(name, shared.clone());
    Ok(shared)
  }

  /// Remove a node and every link touching it.
  pub fn remove_node(&mut self, name: &str) -> Result<(), WorkflowError> {
    if self.nodes.remove(name).is_none() {
      return Err(WorkflowError::NodeNotFound {
        name: name.to_string(),
      });
    }

    self.links_by_source.remove(name);
    self.links_by_target.remove(name);
    for ports in self.links_by_source.values_mut() {
      for links in ports.values_mut() {
        links.retain(|link| link.target_node != name);
      }
    }
    for ports in self.links_by_target.values_mut() {
      for refs in ports.values_mut() {
        refs.retain(|link| link.source_node != name);
      }
    }
    self.prune_empty_indices();
    Ok(())
  }

  pub fn node(&self, name: &str) -> Option<&SharedNode> {
    self.nodes.get(name)
  }

  pub fn nodes(&self) -> impl Iterator<Item = (&String, &SharedNode)> {
    self.nodes.iter()
  }

  pub fn node_names(&self) -> Vec<String> {
    self.nodes.keys().cloned().collect()
  }

  /// Link a source output port to a target input port.
  ///
  /// Both nodes and both ports must exist and the port data types must be
  /// compatible (equal, or one side `any`).
  pub fn link_nodes(
    &mut self,
    source: &str,
    source_port: &str,
    target: &str,
    target_port: &str,
  ) -> Result<(), LinkError> {
    let source_node = self.nodes.get(source).ok_or_else(|| LinkError::NodeNotFound {
      name: source.to_string(),
    })?;
    let target_node = self.nodes.get(target).ok_or_else(|| LinkError::NodeNotFound {
      name: target.to_string(),
    })?;

    let out_port =
      source_node
        .output_port(source_port)
        .ok_or_else(|| LinkError::OutputPortNotFound {
          name: source.to_string(),
          port: source_port.to_string(),
        })?;
    let in_port =
      target_node
        .input_port(target_port)
        .ok_or_else(|| LinkError::InputPortNotFound {
          name: target.to_string(),
          port: target_port.to_string(),
        })?;

    if !out_port.data_type.compatible_with(in_port.data_type) {
      return Err(LinkError::IncompatibleTypes {
        source_node: source.to_string(),
        source_port: source_port.to_string(),
        source_type: out_port.data_type,
        target: target.to_string(),
        target_port: target_port.to_string(),
        target_type: in_port.data_type,
      });
    }
    let link_type = out_port.link_type;

    self
      .links_by_source
      .entry(source.to_string())
      .or_default()
      .entry(source_port.to_string())
      .or_default()
      .push(Link {
        target_node: target.to_string(),
        target_port: target_port.to_string(),
        link_type,
      });
    self
      .links_by_target
      .entry(target.to_string())
      .or_default()
      .entry(target_port.to_string())
      .or_default()
      .push(LinkRef {
        source_node: source.to_string(),
        source_port: source_port.to_string(),
        link_type,
      });
    Ok(())
  }

  /// Remove one link, keeping both indices in step.
  pub fn unlink_nodes(
    &mut self,
    source: &str,
    source_port: &str,
    target: &str,
    target_port: &str,
  ) -> Result<(), LinkError> {
    let forward = self
      .links_by_source
      .get_mut(source)
      .and_then(|ports| ports.get_mut(source_port))
      .map(|links| {
        let before = links.len();
        links.retain(|link| {
          !(link.target_node == target && link.target_port == target_port)
        });
        before != links.len()
      })
      .unwrap_or(false);

    if !forward {
      return Err(LinkError::LinkNotFound {
        source_node: source.to_string(),
        source_port: source_port.to_string(),
        target: target.to_string(),
        target_port: target_port.to_string(),
      });
    }

    if let Some(refs) = self
      .links_by_target
      .get_mut(target)
      .and_then(|ports| ports.get_mut(target_port))
    {
      refs.retain(|link| !(link.source_node == source && link.source_port == source_port));
    }
    self.prune_empty_indices();
    Ok(())
  }

  pub fn links_by_source(&self) -> &LinksBySource {
    &self.links_by_source
  }

  pub fn links_by_target(&self) -> &LinksByTarget {
    &self.links_by_target
  }

  /// Origins feeding one input port, in link creation order.
  pub fn incoming_links(&self, target: &str, target_port: &str) -> &[LinkRef] {
    self
      .links_by_target
      .get(target)
      .and_then(|ports| ports.get(target_port))
      .map(|refs| refs.as_slice())
      .unwrap_or(&[])
  }

  pub fn state(&self) -> WorkflowState {
    *self.state.lock().unwrap()
  }

  pub fn set_state(&self, state: WorkflowState) {
    *self.state.lock().unwrap() = state;
  }

  /// Atomically move `Idle -> Running`. This is the idle gate: exactly one
  /// caller wins when activations race.
  pub fn try_begin_execution(&self) -> bool {
    let mut state = self.state.lock().unwrap();
    if *state == WorkflowState::Idle {
      *state = WorkflowState::Running;
      true
    } else {
      false
    }
  }

  /// Return the workflow and its non-trigger nodes to `Idle`. Triggers
  /// keep their state so schedules survive across executions. Execution
  /// state lives in the engine, which clears it when it drives a reset.
  pub fn reset(&self) {
    for node in self.nodes.values() {
      node.reset();
    }
    self.set_state(WorkflowState::Idle);
  }

  /// Read a value from the cross-execution store.
  pub fn static_get(&self, key: &str) -> Option<serde_json::Value> {
    self.static_data.lock().unwrap().get(key).cloned()
  }

  /// Write a value to the cross-execution store.
  pub fn static_set(&self, key: impl Into<String>, value: serde_json::Value) {
    self.static_data.lock().unwrap().insert(key.into(), value);
  }

  pub(crate) fn static_data_snapshot(&self) -> HashMap<String, serde_json::Value> {
    self.static_data.lock().unwrap().clone()
  }

  pub(crate) fn restore_static_data(&self, data: HashMap<String, serde_json::Value>) {
    *self.static_data.lock().unwrap() = data;
  }

  /// Install canned output for a node; the engine publishes it in place of
  /// running the node.
  pub fn set_mock_data(&mut self, node: impl Into<String>, output: OutputMap) {
    self.mock_data.insert(node.into(), output);
  }

  pub fn mock_data(&self, node: &str) -> Option<&OutputMap> {
    self.mock_data.get(node)
  }

  pub(crate) fn mock_data_all(&self) -> &HashMap<String, OutputMap> {
    &self.mock_data
  }

  pub(crate) fn restore_mock_data(&mut self, mock_data: HashMap<String, OutputMap>) {
    self.mock_data = mock_data;
  }

  fn prune_empty_indices(&mut self) {
    for index_ports in self.links_by_source.values_mut() {
      index_ports.retain(|_, links| !links.is_empty());
    }
    self.links_by_source.retain(|_, ports| !ports.is_empty());
    for index_ports in self.links_by_target.values_mut() {
      index_ports.retain(|_, refs| !refs.is_empty());
    }
    self.links_by_target.retain(|_, ports| !ports.is_empty());
  }
}

impl std::fmt::Debug for Workflow {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Workflow")
      .field("id", &self.id)
      .field("nodes", &self.nodes.len())
      .field("state", &self.state())
      .finish_non_exhaustive()
  }
}
