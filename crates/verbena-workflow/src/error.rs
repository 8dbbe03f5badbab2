//! Workflow graph errors.

/// Rejected link operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LinkError {
  #[error("node '{name}' not found in workflow")]
  NodeNotFound { name: String },

  #[error("node '{name}' has no output port '{port}'")]
  OutputPortNotFound { name: String, port: String },

  #[error("node '{name}' has no input port '{port}'")]
  InputPortNotFound { name: String, port: String },

  #[error(
    "incompatible link {source_node}.{source_port} ({source_type:?}) -> {target}.{target_port} ({target_type:?})"
  )]
  IncompatibleTypes {
    source_node: String,
    source_port: String,
    source_type: verbena_node::DataType,
    target: String,
    target_port: String,
    target_type: verbena_node::DataType,
  },

  #[error("no link from {source_node}.{source_port} to {target}.{target_port}")]
  LinkNotFound {
    source_node: String,
    source_port: String,
    target: String,
    target_port: String,
  },
}

/// Errors from workflow mutation and import.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
  #[error("node '{name}' already exists in workflow")]
  DuplicateNode { name: String },

  #[error("node '{name}' not found in workflow")]
  NodeNotFound { name: String },

  #[error(transparent)]
  Link(#[from] LinkError),

  #[error("workflow graph contains a cycle through {nodes:?}")]
  Cyclic { nodes: Vec<String> },

  #[error("unsupported export format version {version}")]
  UnsupportedVersion { version: u32 },

  #[error("unknown node type '{node_type}' version {version} for node '{name}'")]
  UnknownNodeType {
    name: String,
    node_type: String,
    version: u32,
  },
}
