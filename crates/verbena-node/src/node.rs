//! The node base.
//!
//! Lifecycle, config validation, secret resolution and retry live here so
//! concrete behaviors only implement `process`. State and results sit
//! behind interior mutability: the engine shares nodes as `Arc<Node>` and
//! no lock is ever held across an await point.

use std::sync::{Arc, Mutex, RwLock};

use tracing::warn;
use uuid::Uuid;

use verbena_secret::SecretResolver;

use crate::behavior::{NodeBehavior, NodeContext, OutputMap};
use crate::error::{NodeError, NodeFailure};
use crate::port::Port;
use crate::properties::NodeProperties;
use crate::retry::RetryDelay;
use crate::state::NodeState;

/// How nodes are shared between the workflow, the engine and triggers.
pub type SharedNode = Arc<Node>;

/// Bookkeeping from one `run` call.
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
  /// Number of `process` attempts made (0 if processing never started).
  pub attempts: u32,
}

#[derive(Debug, Default)]
struct NodeRuntime {
  state: NodeState,
  error: Option<NodeFailure>,
  result_data: OutputMap,
}

/// A workflow node. Triggers are nodes with `is_trigger` set; they
/// participate in the graph like any other node but are exempt from
/// `reset` and are never processed by the engine.
pub struct Node {
  properties: NodeProperties,
  inputs: Vec<Port>,
  outputs: Vec<Port>,
  annotation: Option<String>,
  behavior: Arc<dyn NodeBehavior>,
  config: RwLock<serde_json::Value>,
  runtime: Mutex<NodeRuntime>,
}

impl Node {
  /// Create a node. Type name and version come from the behavior.
  pub fn new(name: impl Into<String>, behavior: Arc<dyn NodeBehavior>) -> Self {
    let properties = NodeProperties {
      id: Uuid::new_v4().to_string(),
      name: name.into(),
      node_type: behavior.type_name().to_string(),
      version: behavior.version(),
      position: (0.0, 0.0),
      disabled: false,
      is_trigger: false,
      retry_on_fail: false,
      max_retries: 0,
      retry_delay: RetryDelay::default(),
      continue_on_fail: false,
    };
    Self {
      properties,
      inputs: Vec::new(),
      outputs: Vec::new(),
      annotation: None,
      behavior,
      config: RwLock::new(serde_json::Value::Null),
      runtime: Mutex::new(NodeRuntime::default()),
    }
  }

  /// Rebuild a node from its serialized parts. `node_type` and `version`
  /// are still taken from the behavior, not from the stored properties.
  pub fn from_parts(
    mut properties: NodeProperties,
    config: serde_json::Value,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    annotation: Option<String>,
    behavior: Arc<dyn NodeBehavior>,
  ) -> Self {
    properties.node_type = behavior.type_name().to_string();
    properties.version = behavior.version();
    Self {
      properties,
      inputs,
      outputs,
      annotation,
      behavior,
      config: RwLock::new(config),
      runtime: Mutex::new(NodeRuntime::default()),
    }
  }

  pub fn with_inputs(mut self, inputs: Vec<Port>) -> Self {
    self.inputs = inputs;
    self
  }

  pub fn with_outputs(mut self, outputs: Vec<Port>) -> Self {
    self.outputs = outputs;
    self
  }

  pub fn with_position(mut self, x: f64, y: f64) -> Self {
    self.properties.position = (x, y);
    self
  }

  pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
    self.annotation = Some(annotation.into());
    self
  }

  pub fn disabled(mut self, disabled: bool) -> Self {
    self.properties.disabled = disabled;
    self
  }

  /// Enable the retry policy.
  pub fn retrying(mut self, max_retries: u32, delay: RetryDelay) -> Self {
    self.properties.retry_on_fail = true;
    self.properties.max_retries = max_retries;
    self.properties.retry_delay = delay;
    self
  }

  pub fn continue_on_fail(mut self, continue_on_fail: bool) -> Self {
    self.properties.continue_on_fail = continue_on_fail;
    self
  }

  /// Mark this node as a trigger. Trigger nodes keep their state across
  /// workflow resets.
  pub fn as_trigger(mut self) -> Self {
    self.properties.is_trigger = true;
    self
  }

  pub fn properties(&self) -> &NodeProperties {
    &self.properties
  }

  pub fn name(&self) -> &str {
    &self.properties.name
  }

  pub fn is_trigger(&self) -> bool {
    self.properties.is_trigger
  }

  pub fn is_disabled(&self) -> bool {
    self.properties.disabled
  }

  pub fn inputs(&self) -> &[Port] {
    &self.inputs
  }

  pub fn outputs(&self) -> &[Port] {
    &self.outputs
  }

  pub fn annotation(&self) -> Option<&str> {
    self.annotation.as_deref()
  }

  pub fn input_port(&self, name: &str) -> Option<&Port> {
    self.inputs.iter().find(|port| port.name == name)
  }

  pub fn output_port(&self, name: &str) -> Option<&Port> {
    self.outputs.iter().find(|port| port.name == name)
  }

  pub fn config(&self) -> serde_json::Value {
    self.config.read().unwrap().clone()
  }

  pub fn state(&self) -> NodeState {
    self.runtime.lock().unwrap().state
  }

  pub fn error(&self) -> Option<NodeFailure> {
    self.runtime.lock().unwrap().error.clone()
  }

  /// Clone of the published output map.
  pub fn result_data(&self) -> OutputMap {
    self.runtime.lock().unwrap().result_data.clone()
  }

  /// Validate a config without storing it: secret reference syntax, then
  /// the attached JSON schema if any, then the behavior's domain checks.
  pub fn validate_config(&self, config: &serde_json::Value) -> Result<(), NodeError> {
    verbena_secret::validate_references(config).map_err(|error| NodeError::Validation {
      name: self.properties.name.clone(),
      message: error.to_string(),
    })?;

    if let Some(schema) = self.behavior.config_schema() {
      let validator =
        jsonschema::validator_for(&schema).map_err(|error| NodeError::Validation {
          name: self.properties.name.clone(),
          message: format!("bad config schema: {error}"),
        })?;
      let messages: Vec<String> = validator
        .iter_errors(config)
        .map(|error| error.to_string())
        .collect();
      if !messages.is_empty() {
        return Err(NodeError::Validation {
          name: self.properties.name.clone(),
          message: messages.join("; "),
        });
      }
    }

    self.behavior.validate_config(config)
  }

  /// Validate and store a config. Leaves the node state untouched.
  pub fn setup(&self, config: serde_json::Value) -> Result<(), NodeError> {
    self.validate_config(&config)?;
    *self.config.write().unwrap() = config;
    Ok(())
  }

  /// Execute this node once: gate on `Idle`, resolve secrets, call
  /// `process` under the retry policy, publish the result.
  ///
  /// A terminal failure with `continue_on_fail` set is recorded on the
  /// node but not returned as an error; the caller inspects `state()`.
  pub async fn run(
    &self,
    resolver: &SecretResolver,
    ctx: &NodeContext,
  ) -> Result<RunReport, NodeError> {
    let name = self.properties.name.clone();
    {
      let mut runtime = self.runtime.lock().unwrap();
      if self.properties.disabled {
        return Err(NodeError::Disabled { name });
      }
      if runtime.state != NodeState::Idle {
        return Err(NodeError::NotIdle {
          name,
          state: runtime.state,
        });
      }
      runtime.state = NodeState::Running;
    }

    let config = self.config();
    let effective = match resolver.resolve_config(&config).await {
      Ok(effective) => effective,
      Err(error) => {
        self.record_failure(error.to_string());
        if self.properties.continue_on_fail {
          return Ok(RunReport { attempts: 0 });
        }
        return Err(NodeError::Secret {
          name,
          source: error,
        });
      }
    };

    let mut attempt = 1u32;
    loop {
      match self.behavior.process(&effective, ctx).await {
        Ok(output) => {
          let mut runtime = self.runtime.lock().unwrap();
          runtime.result_data = output;
          runtime.state = NodeState::Completed;
          return Ok(RunReport { attempts: attempt });
        }
        Err(error) => {
          if self.properties.retry_on_fail && attempt <= self.properties.max_retries {
            let delay = self.properties.retry_delay.delay_after(attempt);
            warn!(
              node = %name,
              attempt,
              max_retries = self.properties.max_retries,
              delay_ms = delay.as_millis() as u64,
              error = %error,
              "process failed; retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
          }

          self.record_failure(error.message.clone());
          if self.properties.continue_on_fail {
            return Ok(RunReport { attempts: attempt });
          }
          return Err(NodeError::Processing {
            name,
            attempts: attempt,
            message: error.message,
          });
        }
      }
    }
  }

  /// Publish a record on an output port without processing. Used by
  /// triggers to pre-publish their activation payload; state is untouched.
  pub fn publish_output(&self, port: &str, value: serde_json::Value) -> Result<(), NodeError> {
    if self.output_port(port).is_none() {
      return Err(NodeError::UnknownOutputPort {
        name: self.properties.name.clone(),
        port: port.to_string(),
      });
    }
    let mut runtime = self.runtime.lock().unwrap();
    runtime.result_data.insert(port.to_string(), value);
    Ok(())
  }

  /// Install a canned output and mark the node completed. This is the
  /// mock-data path: the engine publishes the canned records in place of
  /// running the node.
  pub fn complete_with(&self, output: OutputMap) {
    let mut runtime = self.runtime.lock().unwrap();
    runtime.result_data = output;
    runtime.error = None;
    runtime.state = NodeState::Completed;
  }

  /// Return to `Idle`, clearing error and results. Config is preserved.
  /// Triggers are exempt so they keep schedule and timer state across
  /// executions.
  pub fn reset(&self) {
    if self.properties.is_trigger {
      return;
    }
    let mut runtime = self.runtime.lock().unwrap();
    runtime.state = NodeState::Idle;
    runtime.error = None;
    runtime.result_data.clear();
  }

  fn record_failure(&self, message: String) {
    let mut runtime = self.runtime.lock().unwrap();
    runtime.error = Some(NodeFailure::new(
      self.properties.id.clone(),
      self.properties.name.clone(),
      message,
    ));
    runtime.state = NodeState::Failed;
  }
}

impl std::fmt::Debug for Node {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Node")
      .field("name", &self.properties.name)
      .field("node_type", &self.properties.node_type)
      .field("state", &self.state())
      .finish_non_exhaustive()
  }
}
