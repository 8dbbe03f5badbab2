//! Verbena Trigger
//!
//! Entry points that own the boundary between "workflow idle" and
//! "workflow running". A trigger is a node with `is_trigger` set plus an
//! activation surface: it publishes its payload onto its output port,
//! applies the idle gate and hands control to the engine.
//!
//! Two triggers ship with the core: the manual trigger (programmatic
//! activation) and the schedule trigger (structured schedule, one-shot
//! rearm-before-run timer). Webhook-style triggers are external
//! collaborators built on the same surface.

mod clock;
mod error;
mod manual;
mod schedule;

pub use clock::{Clock, SystemClock};
pub use error::TriggerError;
pub use manual::{ManualTrigger, ManualTriggerBehavior};
pub use schedule::{Schedule, ScheduleTrigger, ScheduleTriggerBehavior};

/// Output port name shared by the built-in triggers.
pub const TRIGGER_OUTPUT_PORT: &str = "output";
