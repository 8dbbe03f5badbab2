//! Wall-clock abstraction.
//!
//! Schedule arithmetic needs "now"; hiding it behind a trait lets tests
//! drive a virtual clock while production uses the system clock. Timer
//! sleeps go through tokio and so already honor paused test time.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}
