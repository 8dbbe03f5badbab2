//! The schedule trigger.
//!
//! Schedules are structured, not cron strings. The next fire time is
//! recomputed and the one-shot timer rearmed *before* each run, so a slow
//! execution neither drifts the schedule nor queues fires; overlapping
//! fires are dropped by the idle gate.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use verbena_engine::{Engine, EngineError, ExecutionNotifier, ExecutionReport, NoopNotifier};
use verbena_node::{
  DataType, Node, NodeBehavior, NodeContext, OutputMap, Port, ProcessError, SharedNode,
};
use verbena_workflow::WorkflowState;

use crate::TRIGGER_OUTPUT_PORT;
use crate::clock::{Clock, SystemClock};
use crate::error::TriggerError;

const MAX_INTERVAL_MS: u64 = 366 * 24 * 60 * 60 * 1_000;

/// A structured schedule. All arithmetic is in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum Schedule {
  /// Every minute at the given second.
  Minute { second: u32 },
  /// Every hour at the given minute and second.
  Hour { minute: u32, second: u32 },
  /// Every day at the given time.
  Day { hour: u32, minute: u32, second: u32 },
  /// Every month on the given day; days past the end of a month clamp to
  /// its last day.
  Month {
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
  },
  /// Every year on the given date; years where the date does not exist
  /// (Feb 29) are skipped.
  Year {
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
  },
  /// Every `interval_ms` milliseconds.
  #[serde(rename_all = "camelCase")]
  Interval { interval_ms: u64 },
}

impl Schedule {
  /// Reject out-of-range fields.
  pub fn validate(&self) -> Result<(), TriggerError> {
    let check = |ok: bool, message: &str| {
      if ok {
        Ok(())
      } else {
        Err(TriggerError::InvalidSchedule {
          message: message.to_string(),
        })
      }
    };

    match *self {
      Schedule::Minute { second } => check(second <= 59, "second must be 0-59"),
      Schedule::Hour { minute, second } => {
        check(minute <= 59, "minute must be 0-59")?;
        check(second <= 59, "second must be 0-59")
      }
      Schedule::Day {
        hour,
        minute,
        second,
      } => {
        check(hour <= 23, "hour must be 0-23")?;
        check(minute <= 59, "minute must be 0-59")?;
        check(second <= 59, "second must be 0-59")
      }
      Schedule::Month {
        day,
        hour,
        minute,
        second,
      } => {
        check((1..=31).contains(&day), "day must be 1-31")?;
        check(hour <= 23, "hour must be 0-23")?;
        check(minute <= 59, "minute must be 0-59")?;
        check(second <= 59, "second must be 0-59")
      }
      Schedule::Year {
        month,
        day,
        hour,
        minute,
        second,
      } => {
        check((1..=12).contains(&month), "month must be 1-12")?;
        check(
          day >= 1 && day <= max_days_of_month(month),
          "day is not valid for the month",
        )?;
        check(hour <= 23, "hour must be 0-23")?;
        check(minute <= 59, "minute must be 0-59")?;
        check(second <= 59, "second must be 0-59")
      }
      Schedule::Interval { interval_ms } => {
        check(interval_ms > 0, "interval must be positive")?;
        check(interval_ms <= MAX_INTERVAL_MS, "interval must be at most one year")
      }
    }
  }

  /// The first fire time strictly after `from`.
  pub fn next_fire_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, TriggerError> {
    self.validate()?;
    let unrepresentable = || TriggerError::InvalidSchedule {
      message: "next fire time is unrepresentable".to_string(),
    };

    match *self {
      Schedule::Minute { second } => {
        let candidate = truncate_to_minute(from) + chrono::Duration::seconds(second as i64);
        Ok(if candidate > from {
          candidate
        } else {
          candidate + chrono::Duration::minutes(1)
        })
      }
      Schedule::Hour { minute, second } => {
        let candidate = truncate_to_hour(from)
          + chrono::Duration::minutes(minute as i64)
          + chrono::Duration::seconds(second as i64);
        Ok(if candidate > from {
          candidate
        } else {
          candidate + chrono::Duration::hours(1)
        })
      }
      Schedule::Day {
        hour,
        minute,
        second,
      } => {
        let today = at_time(from.date_naive(), hour, minute, second).ok_or_else(unrepresentable)?;
        if today > from {
          return Ok(today);
        }
        let tomorrow = from.date_naive().succ_opt().ok_or_else(unrepresentable)?;
        at_time(tomorrow, hour, minute, second).ok_or_else(unrepresentable)
      }
      Schedule::Month {
        day,
        hour,
        minute,
        second,
      } => {
        let candidate = month_candidate(from.year(), from.month(), day, hour, minute, second)
          .ok_or_else(unrepresentable)?;
        if candidate > from {
          return Ok(candidate);
        }
        let (year, month) = if from.month() == 12 {
          (from.year() + 1, 1)
        } else {
          (from.year(), from.month() + 1)
        };
        month_candidate(year, month, day, hour, minute, second).ok_or_else(unrepresentable)
      }
      Schedule::Year {
        month,
        day,
        hour,
        minute,
        second,
      } => {
        // Feb 29 recurs within any 8-year window.
        for year in from.year()..=from.year() + 8 {
          let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
          };
          if let Some(candidate) = at_time(date, hour, minute, second) {
            if candidate > from {
              return Ok(candidate);
            }
          }
        }
        Err(unrepresentable())
      }
      Schedule::Interval { interval_ms } => {
        Ok(from + chrono::Duration::milliseconds(interval_ms as i64))
      }
    }
  }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
  t.with_second(0)
    .and_then(|t| t.with_nanosecond(0))
    .unwrap_or(t)
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
  truncate_to_minute(t).with_minute(0).unwrap_or(t)
}

fn at_time(date: NaiveDate, hour: u32, minute: u32, second: u32) -> Option<DateTime<Utc>> {
  date
    .and_hms_opt(hour, minute, second)
    .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Candidate fire time in a given month, clamping the configured day to
/// the month's length (31st in February becomes the 28th or 29th).
fn month_candidate(
  year: i32,
  month: u32,
  day: u32,
  hour: u32,
  minute: u32,
  second: u32,
) -> Option<DateTime<Utc>> {
  let day = day.min(days_in_month(year, month));
  NaiveDate::from_ymd_opt(year, month, day).and_then(|date| at_time(date, hour, minute, second))
}

fn days_in_month(year: i32, month: u32) -> u32 {
  let (next_year, next_month) = if month == 12 {
    (year + 1, 1)
  } else {
    (year, month + 1)
  };
  NaiveDate::from_ymd_opt(next_year, next_month, 1)
    .and_then(|first| first.pred_opt())
    .map(|last| last.day())
    .unwrap_or(28)
}

/// Upper bound on the day field per month, over all years.
fn max_days_of_month(month: u32) -> u32 {
  match month {
    2 => 29,
    4 | 6 | 9 | 11 => 30,
    _ => 31,
  }
}

/// Behavior backing schedule trigger nodes; never processed by the engine.
pub struct ScheduleTriggerBehavior;

#[async_trait]
impl NodeBehavior for ScheduleTriggerBehavior {
  fn type_name(&self) -> &str {
    "schedule-trigger"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    _ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    Err(ProcessError::new("trigger nodes are not processed"))
  }
}

impl ScheduleTriggerBehavior {
  /// Build a trigger node wired for this behavior.
  pub fn node(name: impl Into<String>) -> Node {
    Node::new(name, Arc::new(ScheduleTriggerBehavior))
      .with_outputs(vec![Port::new(TRIGGER_OUTPUT_PORT, DataType::Any)])
      .as_trigger()
  }
}

#[derive(Default)]
struct ScheduleState {
  schedule: Option<Schedule>,
  next_fire: Option<DateTime<Utc>>,
  timer: Option<CancellationToken>,
}

/// Schedule-driven workflow activation.
///
/// `activate_schedule` validates and stores the schedule and computes the
/// next fire without starting automatic firing; firing begins with the
/// first `trigger()` call and continues through rearm-before-run until
/// `deactivate` cancels the pending timer.
pub struct ScheduleTrigger<N: ExecutionNotifier = NoopNotifier> {
  node: SharedNode,
  engine: Arc<Engine<N>>,
  clock: Arc<dyn Clock>,
  weak: Weak<Self>,
  state: Mutex<ScheduleState>,
}

impl<N: ExecutionNotifier + 'static> ScheduleTrigger<N> {
  pub fn new(node: SharedNode, engine: Arc<Engine<N>>) -> Result<Arc<Self>, TriggerError> {
    Self::with_clock(node, engine, Arc::new(SystemClock))
  }

  /// Build with an explicit clock (virtual time in tests).
  pub fn with_clock(
    node: SharedNode,
    engine: Arc<Engine<N>>,
    clock: Arc<dyn Clock>,
  ) -> Result<Arc<Self>, TriggerError> {
    if !node.is_trigger() {
      return Err(TriggerError::NotATriggerNode {
        name: node.name().to_string(),
      });
    }
    Ok(Arc::new_cyclic(|weak| Self {
      node,
      engine,
      clock,
      weak: weak.clone(),
      state: Mutex::new(ScheduleState::default()),
    }))
  }

  /// Validate and store the schedule and compute the next fire time.
  /// Automatic firing does not start until `trigger()` is first called.
  pub fn activate_schedule(&self, schedule: Schedule) -> Result<(), TriggerError> {
    schedule.validate()?;
    let next = schedule.next_fire_after(self.clock.now())?;

    let mut state = self.state.lock().unwrap();
    state.schedule = Some(schedule);
    state.next_fire = Some(next);
    Ok(())
  }

  /// Fire the trigger now (from the timer or programmatically).
  ///
  /// The next fire is computed and the one-shot timer rearmed *before*
  /// the workflow runs; a fire that lands while the workflow is still
  /// running is dropped by the idle gate and the rearmed timer covers the
  /// following slot.
  pub async fn trigger(&self) -> Result<ExecutionReport, TriggerError> {
    let schedule = self
      .state
      .lock()
      .unwrap()
      .schedule
      .ok_or(TriggerError::NotActivated)?;

    let now = self.clock.now();
    let next = schedule.next_fire_after(now)?;
    self.arm(next);

    if self.engine.workflow().state() == WorkflowState::Running {
      warn!(trigger = self.node.name(), "fire dropped: workflow already executing");
      return Err(TriggerError::Rejected);
    }

    let payload = serde_json::json!({
      "timestamp": now.to_rfc3339(),
      "schedule": serde_json::to_value(schedule).unwrap_or_default(),
    });
    self.node.publish_output(TRIGGER_OUTPUT_PORT, payload)?;

    info!(trigger = self.node.name(), next_fire = %next, "schedule trigger fired");
    match self.engine.execute(self.node.name(), None).await {
      Ok(report) => Ok(report),
      Err(EngineError::ExecutionRejected) => Err(TriggerError::Rejected),
      Err(other) => Err(other.into()),
    }
  }

  /// Cancel the pending timer. The stored schedule survives, so a later
  /// `trigger()` resumes firing.
  pub fn deactivate(&self) {
    let mut state = self.state.lock().unwrap();
    if let Some(timer) = state.timer.take() {
      timer.cancel();
    }
    state.next_fire = None;
  }

  /// The next computed fire time, if armed or activated.
  pub fn next_fire(&self) -> Option<DateTime<Utc>> {
    self.state.lock().unwrap().next_fire
  }

  pub fn node(&self) -> &SharedNode {
    &self.node
  }

  /// Replace the pending one-shot timer with one for `at`.
  fn arm(&self, at: DateTime<Utc>) {
    let token = CancellationToken::new();
    {
      let mut state = self.state.lock().unwrap();
      if let Some(old) = state.timer.take() {
        old.cancel();
      }
      state.timer = Some(token.clone());
      state.next_fire = Some(at);
    }

    let weak = self.weak.clone();
    let clock = self.clock.clone();
    tokio::spawn(async move {
      let wait = (at - clock.now()).to_std().unwrap_or(Duration::ZERO);
      tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(wait) => {
          let Some(trigger) = weak.upgrade() else {
            return;
          };
          // Dropped fires surface as Rejected here; that is the overlap
          // policy, not an error worth propagating.
          if let Err(error) = trigger.trigger().await {
            warn!(trigger = trigger.node.name(), error = %error, "scheduled fire did not run");
          }
        }
      }
    });
  }
}

impl<N: ExecutionNotifier> Drop for ScheduleTrigger<N> {
  fn drop(&mut self) {
    if let Some(timer) = self.state.lock().unwrap().timer.take() {
      timer.cancel();
    }
  }
}
