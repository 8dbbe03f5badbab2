//! Retry delay strategies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long to wait before retrying a failed `process` call.
///
/// Serialized either as a bare number of milliseconds (fixed) or as
/// `{"baseDelay": ..., "maxDelay": ...}` (exponential backoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetryDelay {
  Fixed(u64),
  #[serde(rename_all = "camelCase")]
  Exponential { base_delay: u64, max_delay: u64 },
}

impl Default for RetryDelay {
  fn default() -> Self {
    RetryDelay::Fixed(1_000)
  }
}

impl RetryDelay {
  /// Delay before the retry that follows the given failed attempt
  /// (attempts are 1-based).
  pub fn delay_after(self, attempt: u32) -> Duration {
    let millis = match self {
      RetryDelay::Fixed(millis) => millis,
      RetryDelay::Exponential {
        base_delay,
        max_delay,
      } => {
        let shift = attempt.saturating_sub(1).min(63);
        base_delay.saturating_mul(1u64 << shift).min(max_delay)
      }
    };
    Duration::from_millis(millis)
  }
}
