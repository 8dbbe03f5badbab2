//! The execution engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use verbena_node::{
  ExecutionSnapshot, NodeContext, NodeError, NodeState, RunReport, SharedNode,
};
use verbena_secret::SecretResolver;
use verbena_workflow::{Workflow, WorkflowError, WorkflowState, dag};

use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::input::assemble_input;
use crate::state::{ExecutionState, ExecutionStatus, NodeExecutionMetadata};

/// What `execute` resolves to on success.
#[derive(Debug)]
pub struct ExecutionReport {
  pub execution_id: String,
  pub workflow_state: WorkflowState,
  /// Final execution state: node name -> published output map.
  pub state: ExecutionSnapshot,
  pub metadata: HashMap<String, NodeExecutionMetadata>,
}

/// The workflow execution engine.
///
/// Owns execution state, the cancellation signal and per-node metadata.
/// Generic over `N: ExecutionNotifier`; use `Engine::new` for a default
/// engine with no-op notifications.
pub struct Engine<N: ExecutionNotifier = NoopNotifier> {
  workflow: Arc<Workflow>,
  resolver: Arc<SecretResolver>,
  notifier: N,
  state: Mutex<ExecutionState>,
  metadata: Mutex<HashMap<String, NodeExecutionMetadata>>,
  cancel: Mutex<CancellationToken>,
}

impl Engine<NoopNotifier> {
  /// Create an engine with no-op notifications.
  pub fn new(workflow: Arc<Workflow>, resolver: Arc<SecretResolver>) -> Self {
    Self::with_notifier(workflow, resolver, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> Engine<N> {
  /// Create an engine with a custom notifier.
  pub fn with_notifier(workflow: Arc<Workflow>, resolver: Arc<SecretResolver>, notifier: N) -> Self {
    Self {
      workflow,
      resolver,
      notifier,
      state: Mutex::new(ExecutionState::new()),
      metadata: Mutex::new(HashMap::new()),
      cancel: Mutex::new(CancellationToken::new()),
    }
  }

  pub fn workflow(&self) -> &Arc<Workflow> {
    &self.workflow
  }

  pub fn workflow_state(&self) -> WorkflowState {
    self.workflow.state()
  }

  pub fn node_state(&self, name: &str) -> Option<NodeState> {
    self.workflow.node(name).map(|node| node.state())
  }

  pub fn node_metadata(&self, name: &str) -> Option<NodeExecutionMetadata> {
    self.metadata.lock().unwrap().get(name).cloned()
  }

  /// Clone of the current execution state.
  pub fn snapshot(&self) -> ExecutionSnapshot {
    self.state.lock().unwrap().snapshot()
  }

  /// Request cancellation of the in-flight execution. No new nodes are
  /// scheduled; running nodes observe the signal through their context.
  pub fn cancel(&self) {
    self.cancel.lock().unwrap().cancel();
  }

  /// Return the workflow and this engine's execution state to a fresh
  /// idle footing. Trigger nodes keep their state.
  pub async fn reset(&self) {
    self.workflow.reset();
    self.state.lock().unwrap().clear();
    self.metadata.lock().unwrap().clear();
    self.resolver.clear_cache().await;
  }

  /// Run the workflow from the named trigger.
  ///
  /// The trigger has already published its activation output; `execute`
  /// seeds execution state with it (or with `initial_output`), levels the
  /// graph and dispatches level by level.
  #[instrument(
    name = "workflow_execute",
    skip_all,
    fields(workflow_id = %self.workflow.id(), trigger = trigger_name)
  )]
  pub async fn execute(
    &self,
    trigger_name: &str,
    initial_output: Option<serde_json::Value>,
  ) -> Result<ExecutionReport, EngineError> {
    let trigger = self
      .workflow
      .node(trigger_name)
      .ok_or_else(|| EngineError::UnknownTrigger {
        name: trigger_name.to_string(),
      })?
      .clone();
    if !trigger.is_trigger() {
      return Err(EngineError::NotATrigger {
        name: trigger_name.to_string(),
      });
    }

    // Idle gate: exactly one execution at a time.
    if !self.workflow.try_begin_execution() {
      return Err(EngineError::ExecutionRejected);
    }

    let execution_id = Uuid::new_v4().to_string();
    let cancel = {
      let mut guard = self.cancel.lock().unwrap();
      *guard = CancellationToken::new();
      guard.clone()
    };

    self.state.lock().unwrap().clear();
    self.metadata.lock().unwrap().clear();
    for (_, node) in self.workflow.nodes() {
      node.reset();
    }

    // Seed the trigger's pre-published output.
    if let Some(output) = initial_output {
      if let Some(port) = trigger.outputs().first() {
        let port = port.name.clone();
        if let Err(source) = trigger.publish_output(&port, output) {
          self.workflow.set_state(WorkflowState::Failed);
          return Err(EngineError::NodeFailed {
            name: trigger_name.to_string(),
            source,
          });
        }
      }
    }
    self
      .state
      .lock()
      .unwrap()
      .insert(trigger_name, trigger.result_data());

    info!(execution_id = %execution_id, "workflow started");
    self.notifier.notify(ExecutionEvent::WorkflowStarted {
      execution_id: execution_id.clone(),
      workflow_id: self.workflow.id().to_string(),
    });

    let result = self.run_to_completion(&execution_id, &cancel).await;
    self.resolver.clear_cache().await;

    match result {
      Ok(()) => {
        self.workflow.set_state(WorkflowState::Completed);
        info!(execution_id = %execution_id, "workflow completed");
        self.notifier.notify(ExecutionEvent::WorkflowCompleted {
          execution_id: execution_id.clone(),
        });
        Ok(ExecutionReport {
          execution_id,
          workflow_state: WorkflowState::Completed,
          state: self.snapshot(),
          metadata: self.metadata.lock().unwrap().clone(),
        })
      }
      Err(err) => {
        self.workflow.set_state(WorkflowState::Failed);
        match &err {
          EngineError::Cancelled => {
            warn!(execution_id = %execution_id, "workflow cancelled");
            self.notifier.notify(ExecutionEvent::WorkflowCancelled {
              execution_id: execution_id.clone(),
            });
          }
          other => {
            error!(execution_id = %execution_id, error = %other, "workflow failed");
            self.notifier.notify(ExecutionEvent::WorkflowFailed {
              execution_id: execution_id.clone(),
              error: other.to_string(),
            });
          }
        }
        Err(err)
      }
    }
  }

  async fn run_to_completion(
    &self,
    execution_id: &str,
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let graph = dag::build_dependency_graph(&self.workflow);

    let cycles = dag::detect_cycles(&graph);
    if !cycles.is_empty() {
      return Err(EngineError::CycleDetected { cycles });
    }

    let levels = dag::topological_levels(&graph).map_err(|err| match err {
      WorkflowError::Cyclic { nodes } => EngineError::CycleDetected {
        cycles: vec![nodes],
      },
      other => EngineError::Dispatch {
        message: other.to_string(),
      },
    })?;

    for level in levels {
      if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
      }
      self.run_level(execution_id, &level, cancel).await?;
    }
    Ok(())
  }

  /// Dispatch one level: mocked nodes publish their canned output, the
  /// rest run as tasks (or sequentially when parallel execution is off),
  /// and the engine joins the whole level before returning.
  async fn run_level(
    &self,
    execution_id: &str,
    level: &[String],
    cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let mut runnable: Vec<(String, SharedNode)> = Vec::new();
    for name in level {
      let Some(node) = self.workflow.node(name) else {
        continue;
      };
      let node = node.clone();
      // The activated trigger is already seeded; non-activated triggers
      // contribute nothing.
      if node.is_trigger() {
        continue;
      }
      if node.is_disabled() {
        self.notifier.notify(ExecutionEvent::NodeSkipped {
          execution_id: execution_id.to_string(),
          node: name.clone(),
        });
        continue;
      }
      if let Some(mock) = self.workflow.mock_data(name) {
        self.publish_mock(execution_id, name, &node, mock.clone());
        continue;
      }
      runnable.push((name.clone(), node));
    }

    if runnable.is_empty() {
      return Ok(());
    }

    // Failures cancel the rest of the level, not the outer token.
    let level_cancel = cancel.child_token();

    let settings = self.workflow.settings();
    if settings.enable_parallel_execution {
      self
        .run_level_parallel(execution_id, runnable, cancel, &level_cancel)
        .await
    } else {
      self
        .run_level_sequential(execution_id, runnable, cancel, &level_cancel)
        .await
    }
  }

  async fn run_level_parallel(
    &self,
    execution_id: &str,
    runnable: Vec<(String, SharedNode)>,
    cancel: &CancellationToken,
    level_cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    let cap = self.workflow.settings().max_parallel_executions;
    let semaphore = (cap > 0).then(|| Arc::new(Semaphore::new(cap)));

    let mut tasks = FuturesUnordered::new();
    for (name, node) in runnable {
      let dispatch = self.prepare_dispatch(name.clone(), node, level_cancel, semaphore.clone());
      self.notifier.notify(ExecutionEvent::NodeStarted {
        execution_id: execution_id.to_string(),
        node: name,
      });
      tasks.push(tokio::spawn(run_dispatch(dispatch)));
    }

    let mut fatal: Option<EngineError> = None;
    while let Some(joined) = tasks.next().await {
      let (name, outcome) = match joined {
        Ok(result) => result,
        Err(join_error) => {
          level_cancel.cancel();
          if fatal.is_none() {
            fatal = Some(EngineError::Dispatch {
              message: join_error.to_string(),
            });
          }
          continue;
        }
      };
      if let Some(err) = self.record_outcome(execution_id, &name, outcome) {
        // First fatal error wins; siblings are cancelled at level
        // granularity and drain cooperatively.
        level_cancel.cancel();
        if fatal.is_none() {
          fatal = Some(err);
        }
      }
    }

    if cancel.is_cancelled() {
      return Err(EngineError::Cancelled);
    }
    match fatal {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  async fn run_level_sequential(
    &self,
    execution_id: &str,
    runnable: Vec<(String, SharedNode)>,
    cancel: &CancellationToken,
    level_cancel: &CancellationToken,
  ) -> Result<(), EngineError> {
    for (name, node) in runnable {
      if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
      }
      let dispatch = self.prepare_dispatch(name.clone(), node, level_cancel, None);
      self.notifier.notify(ExecutionEvent::NodeStarted {
        execution_id: execution_id.to_string(),
        node: name.clone(),
      });
      let (name, outcome) = run_dispatch(dispatch).await;
      if let Some(err) = self.record_outcome(execution_id, &name, outcome) {
        return Err(err);
      }
    }
    if cancel.is_cancelled() {
      return Err(EngineError::Cancelled);
    }
    Ok(())
  }

  /// Assemble everything a dispatch task needs up front; inputs depend
  /// only on prior levels, so assembly on the dispatcher is equivalent to
  /// assembly inside the task.
  fn prepare_dispatch(
    &self,
    name: String,
    node: SharedNode,
    level_cancel: &CancellationToken,
    semaphore: Option<Arc<Semaphore>>,
  ) -> Dispatch {
    let state = self.state.lock().unwrap();
    let input = assemble_input(&self.workflow, &state, &node);
    let snapshot = state.snapshot();
    drop(state);

    Dispatch {
      name,
      node,
      resolver: self.resolver.clone(),
      input,
      snapshot,
      cancel: level_cancel.clone(),
      semaphore,
    }
  }

  fn publish_mock(
    &self,
    execution_id: &str,
    name: &str,
    node: &SharedNode,
    mock: verbena_node::OutputMap,
  ) {
    node.complete_with(mock.clone());
    self.state.lock().unwrap().insert(name, mock);
    let now = Utc::now();
    self.metadata.lock().unwrap().insert(
      name.to_string(),
      NodeExecutionMetadata::new(now, now, ExecutionStatus::Mocked, 0),
    );
    self.notifier.notify(ExecutionEvent::NodeCompleted {
      execution_id: execution_id.to_string(),
      node: name.to_string(),
    });
  }

  /// Publish results, record metadata and emit events for one finished
  /// dispatch. Returns the fatal error, if this node produced one.
  fn record_outcome(
    &self,
    execution_id: &str,
    name: &str,
    outcome: DispatchOutcome,
  ) -> Option<EngineError> {
    let DispatchOutcome::Ran {
      node,
      result,
      started,
      ended,
    } = outcome
    else {
      // Cancelled before it started; nothing ran, nothing to record.
      return None;
    };

    match result {
      Ok(RunReport { attempts }) => match node.state() {
        NodeState::Completed => {
          self
            .state
            .lock()
            .unwrap()
            .insert(name, node.result_data());
          self.metadata.lock().unwrap().insert(
            name.to_string(),
            NodeExecutionMetadata::new(started, ended, ExecutionStatus::Completed, attempts),
          );
          self.notifier.notify(ExecutionEvent::NodeCompleted {
            execution_id: execution_id.to_string(),
            node: name.to_string(),
          });
          None
        }
        // Failed but absorbed by continue_on_fail: no publication, so
        // downstream assembly sees fewer contributions.
        _ => {
          let message = node
            .error()
            .map(|failure| failure.message)
            .unwrap_or_else(|| "unknown failure".to_string());
          self.metadata.lock().unwrap().insert(
            name.to_string(),
            NodeExecutionMetadata::new(started, ended, ExecutionStatus::Failed, attempts),
          );
          warn!(node = name, error = %message, "node failed; continuing");
          self.notifier.notify(ExecutionEvent::NodeFailed {
            execution_id: execution_id.to_string(),
            node: name.to_string(),
            error: message,
          });
          None
        }
      },
      Err(source) => {
        let attempts = match &source {
          NodeError::Processing { attempts, .. } => *attempts,
          _ => 0,
        };
        self.metadata.lock().unwrap().insert(
          name.to_string(),
          NodeExecutionMetadata::new(started, ended, ExecutionStatus::Failed, attempts),
        );
        self.notifier.notify(ExecutionEvent::NodeFailed {
          execution_id: execution_id.to_string(),
          node: name.to_string(),
          error: source.to_string(),
        });
        Some(EngineError::NodeFailed {
          name: name.to_string(),
          source,
        })
      }
    }
  }
}

/// Everything one node dispatch needs, owned so the task is `'static`.
struct Dispatch {
  name: String,
  node: SharedNode,
  resolver: Arc<SecretResolver>,
  input: HashMap<String, serde_json::Value>,
  snapshot: ExecutionSnapshot,
  cancel: CancellationToken,
  semaphore: Option<Arc<Semaphore>>,
}

enum DispatchOutcome {
  Ran {
    node: SharedNode,
    result: Result<RunReport, verbena_node::NodeError>,
    started: DateTime<Utc>,
    ended: DateTime<Utc>,
  },
  NotRun,
}

/// Run one node: wait for a concurrency slot, then drive the node's `run`.
async fn run_dispatch(dispatch: Dispatch) -> (String, DispatchOutcome) {
  let Dispatch {
    name,
    node,
    resolver,
    input,
    snapshot,
    cancel,
    semaphore,
  } = dispatch;

  let _permit = match semaphore {
    Some(semaphore) => match semaphore.acquire_owned().await {
      Ok(permit) => Some(permit),
      Err(_) => return (name, DispatchOutcome::NotRun),
    },
    None => None,
  };
  if cancel.is_cancelled() {
    return (name, DispatchOutcome::NotRun);
  }

  let ctx = NodeContext::new(input, snapshot).with_cancel(cancel);
  let started = Utc::now();
  let result = node.run(&resolver, &ctx).await;
  let ended = Utc::now();

  (
    name,
    DispatchOutcome::Ran {
      node,
      result,
      started,
      ended,
    },
  )
}
