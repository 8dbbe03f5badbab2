//! End-to-end engine tests against abstract test nodes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use verbena_engine::{Engine, EngineError, ExecutionStatus};
use verbena_node::{
  DataType, Node, NodeBehavior, NodeContext, NodeState, OutputMap, Port, ProcessError,
  RetryDelay,
};
use verbena_secret::{MemorySecretRegistry, SecretResolver};
use verbena_workflow::{Workflow, WorkflowSettings, WorkflowState};

/// Trigger nodes are never processed by the engine; this behavior proves
/// it by failing loudly if called.
struct TriggerStub;

#[async_trait]
impl NodeBehavior for TriggerStub {
  fn type_name(&self) -> &str {
    "test-trigger"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    _ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    Err(ProcessError::new("trigger nodes are not processed"))
  }
}

/// Reads `{"value": n}` from its input port and emits `{"value": n * 2}`.
struct Double;

#[async_trait]
impl NodeBehavior for Double {
  fn type_name(&self) -> &str {
    "double"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    let value = ctx.input["input"]["value"]
      .as_i64()
      .ok_or_else(|| ProcessError::new("missing input value"))?;
    Ok([("output".to_string(), serde_json::json!({"value": value * 2}))].into())
  }
}

/// Reads `{"value": n}` and emits `{"value": n + 10}`.
struct AddTen;

#[async_trait]
impl NodeBehavior for AddTen {
  fn type_name(&self) -> &str {
    "add-ten"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    let value = ctx.input["input"]["value"]
      .as_i64()
      .ok_or_else(|| ProcessError::new("missing input value"))?;
    Ok([("output".to_string(), serde_json::json!({"value": value + 10}))].into())
  }
}

/// Emits a fixed record, regardless of input.
struct Emit(serde_json::Value);

#[async_trait]
impl NodeBehavior for Emit {
  fn type_name(&self) -> &str {
    "emit"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    _ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    Ok([("output".to_string(), self.0.clone())].into())
  }
}

/// Passes its raw input port value through.
struct Collect;

#[async_trait]
impl NodeBehavior for Collect {
  fn type_name(&self) -> &str {
    "collect"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    let value = ctx.input.get("input").cloned().unwrap_or(serde_json::Value::Null);
    Ok([("output".to_string(), value)].into())
  }
}

/// Fails a set number of times, then succeeds.
struct Flaky {
  failures: AtomicU32,
}

#[async_trait]
impl NodeBehavior for Flaky {
  fn type_name(&self) -> &str {
    "flaky"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    _ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    let remaining = self.failures.load(Ordering::SeqCst);
    if remaining > 0 {
      self.failures.store(remaining - 1, Ordering::SeqCst);
      return Err(ProcessError::new("transient failure"));
    }
    Ok([("output".to_string(), serde_json::json!({"ok": true}))].into())
  }
}

/// Always fails.
struct AlwaysFails;

#[async_trait]
impl NodeBehavior for AlwaysFails {
  fn type_name(&self) -> &str {
    "always-fails"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    _ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    Err(ProcessError::new("hard failure"))
  }
}

/// Sleeps, checking the cancellation signal, then emits.
struct Slow {
  millis: u64,
}

#[async_trait]
impl NodeBehavior for Slow {
  fn type_name(&self) -> &str {
    "slow"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    tokio::select! {
      _ = tokio::time::sleep(Duration::from_millis(self.millis)) => {
        Ok([("output".to_string(), serde_json::json!({"ok": true}))].into())
      }
      _ = ctx.cancel.cancelled() => Err(ProcessError::new("cancelled")),
    }
  }
}

/// Tracks how many instances run at once.
struct Tracked {
  current: Arc<AtomicUsize>,
  peak: Arc<AtomicUsize>,
  millis: u64,
}

#[async_trait]
impl NodeBehavior for Tracked {
  fn type_name(&self) -> &str {
    "tracked"
  }

  async fn process(
    &self,
    _config: &serde_json::Value,
    _ctx: &NodeContext,
  ) -> Result<OutputMap, ProcessError> {
    let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(self.millis)).await;
    self.current.fetch_sub(1, Ordering::SeqCst);
    Ok([("output".to_string(), serde_json::json!({"ok": true}))].into())
  }
}

fn trigger(name: &str) -> Node {
  Node::new(name, Arc::new(TriggerStub))
    .with_outputs(vec![Port::new("output", DataType::Any)])
    .as_trigger()
}

fn step(name: &str, behavior: Arc<dyn NodeBehavior>) -> Node {
  Node::new(name, behavior)
    .with_inputs(vec![Port::new("input", DataType::Any)])
    .with_outputs(vec![Port::new("output", DataType::Any)])
}

fn resolver() -> Arc<SecretResolver> {
  Arc::new(SecretResolver::new(Arc::new(MemorySecretRegistry::new())))
}

fn engine_for(workflow: Workflow) -> Engine {
  Engine::new(Arc::new(workflow), resolver())
}

/// Trigger `t` -> `a` (x2) -> `b` (+10), activated with `{value: 5}`.
fn linear_chain() -> Workflow {
  let mut workflow = Workflow::new("linear");
  workflow.add_node(trigger("t")).unwrap();
  workflow.add_node(step("a", Arc::new(Double))).unwrap();
  workflow.add_node(step("b", Arc::new(AddTen))).unwrap();
  workflow.link_nodes("t", "output", "a", "input").unwrap();
  workflow.link_nodes("a", "output", "b", "input").unwrap();
  workflow
}

#[tokio::test]
async fn linear_chain_happy_path() {
  let engine = engine_for(linear_chain());

  let report = engine
    .execute("t", Some(serde_json::json!({"value": 5})))
    .await
    .unwrap();

  assert_eq!(report.state["t"]["output"], serde_json::json!({"value": 5}));
  assert_eq!(report.state["a"]["output"], serde_json::json!({"value": 10}));
  assert_eq!(report.state["b"]["output"], serde_json::json!({"value": 20}));
  assert_eq!(engine.workflow_state(), WorkflowState::Completed);

  // Every non-trigger node ended in a terminal state.
  assert_eq!(engine.node_state("a"), Some(NodeState::Completed));
  assert_eq!(engine.node_state("b"), Some(NodeState::Completed));

  // Upstream finishes before downstream starts.
  let a = engine.node_metadata("a").unwrap();
  let b = engine.node_metadata("b").unwrap();
  assert!(a.end_time <= b.start_time);
  assert_eq!(a.status, ExecutionStatus::Completed);
  assert_eq!(a.attempts, 1);
}

#[tokio::test]
async fn fan_out_fan_in_preserves_link_order() {
  // t -> {a, b} -> c with both feeding c's single input port.
  let mut workflow = Workflow::new("diamond");
  workflow.add_node(trigger("t")).unwrap();
  workflow
    .add_node(step("a", Arc::new(Emit(serde_json::json!({"v": 1})))))
    .unwrap();
  workflow
    .add_node(step("b", Arc::new(Emit(serde_json::json!({"v": 2})))))
    .unwrap();
  workflow.add_node(step("c", Arc::new(Collect))).unwrap();
  workflow.link_nodes("t", "output", "a", "input").unwrap();
  workflow.link_nodes("t", "output", "b", "input").unwrap();
  workflow.link_nodes("a", "output", "c", "input").unwrap();
  workflow.link_nodes("b", "output", "c", "input").unwrap();

  let engine = engine_for(workflow);
  let report = engine.execute("t", Some(serde_json::json!({}))).await.unwrap();

  assert_eq!(
    report.state["c"]["output"],
    serde_json::json!([{"v": 1}, {"v": 2}])
  );
  assert_eq!(engine.workflow_state(), WorkflowState::Completed);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_through_retry() {
  let mut workflow = Workflow::new("retry");
  workflow.add_node(trigger("t")).unwrap();
  workflow
    .add_node(
      step(
        "r",
        Arc::new(Flaky {
          failures: AtomicU32::new(1),
        }),
      )
      .retrying(
        3,
        RetryDelay::Exponential {
          base_delay: 500,
          max_delay: 2_000,
        },
      ),
    )
    .unwrap();
  workflow.link_nodes("t", "output", "r", "input").unwrap();

  let engine = engine_for(workflow);
  engine.execute("t", Some(serde_json::json!({}))).await.unwrap();

  assert_eq!(engine.node_state("r"), Some(NodeState::Completed));
  assert_eq!(engine.node_metadata("r").unwrap().attempts, 2);
}

#[tokio::test]
async fn continue_on_fail_keeps_the_workflow_going() {
  // t -> x (fails hard, continue_on_fail) -> y
  let mut workflow = Workflow::new("continue");
  workflow.add_node(trigger("t")).unwrap();
  workflow
    .add_node(step("x", Arc::new(AlwaysFails)).continue_on_fail(true))
    .unwrap();
  workflow.add_node(step("y", Arc::new(Collect))).unwrap();
  workflow.link_nodes("t", "output", "x", "input").unwrap();
  workflow.link_nodes("x", "output", "y", "input").unwrap();

  let engine = engine_for(workflow);
  let report = engine.execute("t", Some(serde_json::json!({}))).await.unwrap();

  assert_eq!(engine.workflow_state(), WorkflowState::Completed);
  assert_eq!(engine.node_state("x"), Some(NodeState::Failed));
  assert_eq!(engine.node_state("y"), Some(NodeState::Completed));

  // x published nothing, so y saw an absent port.
  assert!(!report.state.contains_key("x"));
  assert_eq!(report.state["y"]["output"], serde_json::Value::Null);
  assert_eq!(
    engine.node_metadata("x").unwrap().status,
    ExecutionStatus::Failed
  );
}

#[tokio::test]
async fn unrecovered_failure_stops_later_levels() {
  let mut workflow = Workflow::new("fail");
  workflow.add_node(trigger("t")).unwrap();
  workflow.add_node(step("x", Arc::new(AlwaysFails))).unwrap();
  workflow.add_node(step("y", Arc::new(Collect))).unwrap();
  workflow.link_nodes("t", "output", "x", "input").unwrap();
  workflow.link_nodes("x", "output", "y", "input").unwrap();

  let engine = engine_for(workflow);
  let err = engine.execute("t", Some(serde_json::json!({}))).await.unwrap_err();

  assert!(matches!(err, EngineError::NodeFailed { ref name, .. } if name == "x"));
  assert_eq!(engine.workflow_state(), WorkflowState::Failed);
  assert_eq!(engine.node_state("x"), Some(NodeState::Failed));
  // y was never scheduled.
  assert_eq!(engine.node_state("y"), Some(NodeState::Idle));
  assert!(engine.node_metadata("y").is_none());
}

#[tokio::test]
async fn cycles_abort_before_any_node_runs() {
  let mut workflow = Workflow::new("cyclic");
  workflow.add_node(trigger("t")).unwrap();
  workflow.add_node(step("a", Arc::new(Collect))).unwrap();
  workflow.add_node(step("b", Arc::new(Collect))).unwrap();
  workflow.link_nodes("a", "output", "b", "input").unwrap();
  workflow.link_nodes("b", "output", "a", "input").unwrap();

  let engine = engine_for(workflow);
  let err = engine.execute("t", Some(serde_json::json!({}))).await.unwrap_err();

  assert!(matches!(err, EngineError::CycleDetected { .. }));
  assert_eq!(engine.workflow_state(), WorkflowState::Failed);
  assert_eq!(engine.node_state("a"), Some(NodeState::Idle));
  assert_eq!(engine.node_state("b"), Some(NodeState::Idle));
}

#[tokio::test]
async fn empty_workflow_completes_with_only_trigger_output() {
  let mut workflow = Workflow::new("empty");
  workflow.add_node(trigger("t")).unwrap();

  let engine = engine_for(workflow);
  let report = engine
    .execute("t", Some(serde_json::json!({"fired": true})))
    .await
    .unwrap();

  assert_eq!(engine.workflow_state(), WorkflowState::Completed);
  assert_eq!(report.state.len(), 1);
  assert_eq!(report.state["t"]["output"]["fired"], true);
}

#[tokio::test]
async fn disabled_nodes_are_skipped_not_failed() {
  let mut workflow = Workflow::new("disabled");
  workflow.add_node(trigger("t")).unwrap();
  workflow
    .add_node(step("x", Arc::new(Collect)).disabled(true))
    .unwrap();
  workflow.add_node(step("y", Arc::new(Collect))).unwrap();
  workflow.link_nodes("t", "output", "x", "input").unwrap();
  workflow.link_nodes("x", "output", "y", "input").unwrap();

  let engine = engine_for(workflow);
  let report = engine.execute("t", Some(serde_json::json!({}))).await.unwrap();

  assert_eq!(engine.workflow_state(), WorkflowState::Completed);
  assert_eq!(engine.node_state("x"), Some(NodeState::Idle));
  assert!(engine.node_metadata("x").is_none());
  assert!(!report.state.contains_key("x"));
  assert_eq!(report.state["y"]["output"], serde_json::Value::Null);
}

#[tokio::test]
async fn mock_data_short_circuits_execution() {
  let mut workflow = Workflow::new("mocked");
  workflow.add_node(trigger("t")).unwrap();
  // Would fail hard if actually run.
  workflow.add_node(step("x", Arc::new(AlwaysFails))).unwrap();
  workflow.add_node(step("y", Arc::new(Collect))).unwrap();
  workflow.link_nodes("t", "output", "x", "input").unwrap();
  workflow.link_nodes("x", "output", "y", "input").unwrap();
  workflow.set_mock_data(
    "x",
    [("output".to_string(), serde_json::json!({"canned": true}))].into(),
  );

  let engine = engine_for(workflow);
  let report = engine.execute("t", Some(serde_json::json!({}))).await.unwrap();

  assert_eq!(engine.workflow_state(), WorkflowState::Completed);
  assert_eq!(engine.node_state("x"), Some(NodeState::Completed));
  assert_eq!(report.state["x"]["output"]["canned"], true);
  assert_eq!(report.state["y"]["output"]["canned"], true);
  assert_eq!(
    engine.node_metadata("x").unwrap().status,
    ExecutionStatus::Mocked
  );
}

#[tokio::test]
async fn reset_then_execute_reproduces_the_state() {
  let engine = engine_for(linear_chain());

  let first = engine
    .execute("t", Some(serde_json::json!({"value": 5})))
    .await
    .unwrap();
  engine.reset().await;
  assert_eq!(engine.workflow_state(), WorkflowState::Idle);
  assert!(engine.snapshot().is_empty());

  let second = engine
    .execute("t", Some(serde_json::json!({"value": 5})))
    .await
    .unwrap();
  assert_eq!(first.state, second.state);
}

#[tokio::test]
async fn concurrent_execute_is_rejected_by_the_idle_gate() {
  let mut workflow = Workflow::new("busy");
  workflow.add_node(trigger("t")).unwrap();
  workflow
    .add_node(step("slow", Arc::new(Slow { millis: 200 })))
    .unwrap();
  workflow.link_nodes("t", "output", "slow", "input").unwrap();

  let engine = Arc::new(engine_for(workflow));
  let background = {
    let engine = engine.clone();
    tokio::spawn(async move { engine.execute("t", Some(serde_json::json!({}))).await })
  };

  // Let the first execution claim the workflow.
  tokio::time::sleep(Duration::from_millis(50)).await;
  let err = engine.execute("t", Some(serde_json::json!({}))).await.unwrap_err();
  assert!(matches!(err, EngineError::ExecutionRejected));

  background.await.unwrap().unwrap();
  assert_eq!(engine.workflow_state(), WorkflowState::Completed);
}

#[tokio::test]
async fn cancel_fails_the_workflow_with_cancelled() {
  let mut workflow = Workflow::new("cancel");
  workflow.add_node(trigger("t")).unwrap();
  workflow
    .add_node(step("slow", Arc::new(Slow { millis: 5_000 })))
    .unwrap();
  workflow.link_nodes("t", "output", "slow", "input").unwrap();

  let engine = Arc::new(engine_for(workflow));
  let background = {
    let engine = engine.clone();
    tokio::spawn(async move { engine.execute("t", Some(serde_json::json!({}))).await })
  };

  tokio::time::sleep(Duration::from_millis(50)).await;
  engine.cancel();

  let err = background.await.unwrap().unwrap_err();
  assert!(matches!(err, EngineError::Cancelled));
  assert_eq!(engine.workflow_state(), WorkflowState::Failed);
}

#[tokio::test]
async fn max_parallel_executions_caps_level_concurrency() {
  let current = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let mut workflow = Workflow::new("capped").with_settings(WorkflowSettings {
    max_parallel_executions: 1,
    ..WorkflowSettings::default()
  });
  workflow.add_node(trigger("t")).unwrap();
  for name in ["a", "b", "c"] {
    workflow
      .add_node(step(
        name,
        Arc::new(Tracked {
          current: current.clone(),
          peak: peak.clone(),
          millis: 20,
        }),
      ))
      .unwrap();
    workflow.link_nodes("t", "output", name, "input").unwrap();
  }

  let engine = engine_for(workflow);
  engine.execute("t", Some(serde_json::json!({}))).await.unwrap();

  assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn siblings_run_in_parallel_when_unbounded() {
  let current = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let mut workflow = Workflow::new("parallel");
  workflow.add_node(trigger("t")).unwrap();
  for name in ["a", "b", "c"] {
    workflow
      .add_node(step(
        name,
        Arc::new(Tracked {
          current: current.clone(),
          peak: peak.clone(),
          millis: 100,
        }),
      ))
      .unwrap();
    workflow.link_nodes("t", "output", name, "input").unwrap();
  }

  let engine = engine_for(workflow);
  engine.execute("t", Some(serde_json::json!({}))).await.unwrap();

  assert!(peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn sequential_mode_runs_one_node_at_a_time() {
  let current = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let mut workflow = Workflow::new("sequential").with_settings(WorkflowSettings {
    enable_parallel_execution: false,
    ..WorkflowSettings::default()
  });
  workflow.add_node(trigger("t")).unwrap();
  for name in ["a", "b"] {
    workflow
      .add_node(step(
        name,
        Arc::new(Tracked {
          current: current.clone(),
          peak: peak.clone(),
          millis: 10,
        }),
      ))
      .unwrap();
    workflow.link_nodes("t", "output", name, "input").unwrap();
  }

  let engine = engine_for(workflow);
  engine.execute("t", Some(serde_json::json!({}))).await.unwrap();

  assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn secrets_resolve_before_process() {
  struct UsesConfig;

  #[async_trait]
  impl NodeBehavior for UsesConfig {
    fn type_name(&self) -> &str {
      "uses-config"
    }

    async fn process(
      &self,
      config: &serde_json::Value,
      _ctx: &NodeContext,
    ) -> Result<OutputMap, ProcessError> {
      Ok([("output".to_string(), config["token"].clone())].into())
    }
  }

  let mut workflow = Workflow::new("secrets");
  workflow.add_node(trigger("t")).unwrap();
  let node = workflow
    .add_node(step("n", Arc::new(UsesConfig)))
    .unwrap();
  node
    .setup(serde_json::json!({"token": "{{secrets.api.token}}"}))
    .unwrap();
  workflow.link_nodes("t", "output", "n", "input").unwrap();

  let registry = Arc::new(MemorySecretRegistry::new());
  registry.insert("api", serde_json::json!({"token": "s3cret"}));
  let engine = Engine::new(
    Arc::new(workflow),
    Arc::new(SecretResolver::new(registry)),
  );

  let report = engine.execute("t", Some(serde_json::json!({}))).await.unwrap();
  assert_eq!(report.state["n"]["output"], "s3cret");
}

#[tokio::test]
async fn unknown_or_non_trigger_entry_is_rejected() {
  let mut workflow = Workflow::new("entries");
  workflow.add_node(trigger("t")).unwrap();
  workflow.add_node(step("n", Arc::new(Collect))).unwrap();
  workflow.link_nodes("t", "output", "n", "input").unwrap();

  let engine = engine_for(workflow);
  assert!(matches!(
    engine.execute("ghost", None).await.unwrap_err(),
    EngineError::UnknownTrigger { .. }
  ));
  assert!(matches!(
    engine.execute("n", None).await.unwrap_err(),
    EngineError::NotATrigger { .. }
  ));
  // Rejection never touched the workflow.
  assert_eq!(engine.workflow_state(), WorkflowState::Idle);
}
