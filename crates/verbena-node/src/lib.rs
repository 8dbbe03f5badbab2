//! Verbena Node
//!
//! The node runtime contract: typed ports, the node state machine,
//! configuration validation, the retry policy, and the `NodeBehavior`
//! trait that concrete node implementations plug into.
//!
//! The base `Node` concentrates lifecycle, retry and secret resolution so
//! that implementations only provide `process`. The execution engine never
//! branches on node kind beyond the `is_trigger` flag.

mod behavior;
mod error;
mod node;
mod port;
mod properties;
mod registry;
mod retry;
mod state;

pub use behavior::{ExecutionSnapshot, NodeBehavior, NodeContext, OutputMap};
pub use error::{NodeError, NodeFailure, ProcessError};
pub use node::{Node, RunReport, SharedNode};
pub use port::{DataType, LinkType, Port};
pub use properties::NodeProperties;
pub use registry::NodeTypeRegistry;
pub use retry::RetryDelay;
pub use state::NodeState;
