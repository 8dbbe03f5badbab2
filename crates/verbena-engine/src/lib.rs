//! Verbena Engine
//!
//! The execution engine: owns per-execution state, the cancellation
//! signal and per-node metadata, and drives the level-synchronous
//! dispatch loop. Levels come from the topological sort; nodes within a
//! level run on independently scheduled tasks, joined before the next
//! level starts. Intra-level parallelism is where throughput is earned;
//! inter-level ordering is where correctness lives.

mod engine;
mod error;
mod events;
mod input;
mod state;

pub use engine::{Engine, ExecutionReport};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use input::assemble_input;
pub use state::{ExecutionState, ExecutionStatus, NodeExecutionMetadata};
