//! Verbena Workflow
//!
//! The workflow graph: nodes keyed by unique name, typed port-to-port
//! links kept in two mutually inverse indices, workflow settings and
//! state, plus the DAG utilities the engine schedules with and the
//! export/import records.
//!
//! The workflow owns its nodes; the engine borrows the workflow and
//! resolves node names through it. Nodes refer to each other only by
//! name.

pub mod dag;
mod error;
mod link;
mod serialize;
#[cfg(test)]
mod test_support;
mod workflow;

pub use error::{LinkError, WorkflowError};
pub use link::{Link, LinkRef, LinksBySource, LinksByTarget};
pub use serialize::{FORMAT_VERSION, NodeExport, WorkflowExport};
pub use workflow::{Workflow, WorkflowSettings, WorkflowState};
