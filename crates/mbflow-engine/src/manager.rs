//! Execution manager facade.
//!
//! Ties the ports together for one run: load the workflow from the store,
//! create the execution record, run the DAG, compute the final output from
//! the leaf nodes, persist the terminal record, and emit the terminal event.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use uuid::Uuid;

use mbflow_store::{ExecutionRecord, ExecutionStatus, Store};

use crate::checkpoint::CheckpointManager;
use crate::error::ExecutionError;
use crate::events::{EventKind, EventSink, ExecutionEvent, NoopSink};
use crate::options::ExecutionOptions;
use crate::registry::ExecutorRegistry;
use crate::scheduler::DagExecutor;
use crate::state::ExecutionState;

/// Facade for running workflows end to end.
///
/// The manager is cheap to clone; clones share the store, registry, sink and
/// checkpoint manager.
#[derive(Clone)]
pub struct ExecutionManager {
  store: Arc<dyn Store>,
  registry: Arc<dyn ExecutorRegistry>,
  sink: Arc<dyn EventSink>,
  checkpoints: Arc<CheckpointManager>,
  options: ExecutionOptions,
}

impl ExecutionManager {
  pub fn new(store: Arc<dyn Store>, registry: Arc<dyn ExecutorRegistry>) -> Self {
    Self {
      store,
      registry,
      sink: Arc::new(NoopSink),
      checkpoints: Arc::new(CheckpointManager::new()),
      options: ExecutionOptions::default(),
    }
  }

  pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
    self.sink = sink;
    self
  }

  pub fn with_options(mut self, options: ExecutionOptions) -> Self {
    self.options = options;
    self
  }

  /// The checkpoint manager backing resume.
  pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
    &self.checkpoints
  }

  /// Run a workflow to completion.
  ///
  /// Setup failures (unknown workflow, invalid graph, store errors) are
  /// returned as `Err`; a run that started always yields the terminal
  /// record, with its `status` and `error` telling the outcome.
  #[instrument(skip(self, input, run_variables, cancel))]
  pub async fn execute(
    &self,
    workflow_id: &str,
    input: Value,
    run_variables: HashMap<String, Value>,
    cancel: CancellationToken,
  ) -> Result<ExecutionRecord, ExecutionError> {
    let (state, record) = self.prepare(workflow_id, input, run_variables).await?;
    self.finish(state, record, cancel, 0).await
  }

  /// Fire-and-forget variant: returns the running record immediately and
  /// finishes the execution on a spawned task.
  pub async fn execute_detached(
    &self,
    workflow_id: &str,
    input: Value,
    run_variables: HashMap<String, Value>,
    cancel: CancellationToken,
  ) -> Result<ExecutionRecord, ExecutionError> {
    let (state, record) = self.prepare(workflow_id, input, run_variables).await?;

    let manager = self.clone();
    let detached = record.clone();
    tokio::spawn(async move {
      if let Err(err) = manager.finish(state, detached, cancel, 0).await {
        error!(error = %err, "detached execution failed to finalize");
      }
    });

    Ok(record)
  }

  /// Resume an execution from its latest checkpoint.
  pub async fn resume(
    &self,
    execution_id: &str,
    cancel: CancellationToken,
  ) -> Result<ExecutionRecord, ExecutionError> {
    let mut record = self.store.get_execution(execution_id).await?;
    let checkpoint = self.checkpoints.latest(execution_id).ok_or_else(|| {
      ExecutionError::InvalidCheckpoint(format!("no checkpoint for execution '{execution_id}'"))
    })?;

    let workflow = Arc::new(self.store.load_workflow(&record.workflow_id).await?);
    let (state, start_wave) =
      CheckpointManager::restore(&checkpoint, workflow, record.input.clone())?;

    record.status = ExecutionStatus::Running;
    record.output = None;
    record.error = None;
    record.completed_at = None;
    self.store.update_execution(&record).await?;

    info!(execution_id, start_wave, "resuming from checkpoint");
    self.finish(Arc::new(state), record, cancel, start_wave).await
  }

  /// Load, validate, and persist the pending→running record.
  async fn prepare(
    &self,
    workflow_id: &str,
    input: Value,
    run_variables: HashMap<String, Value>,
  ) -> Result<(Arc<ExecutionState>, ExecutionRecord), ExecutionError> {
    let workflow = Arc::new(self.store.load_workflow(workflow_id).await?);
    let variables = merge_variables(&workflow.variables, run_variables);

    let execution_id = Uuid::new_v4().to_string();
    // Validation happens here, before any record exists.
    let state = Arc::new(ExecutionState::new(
      &execution_id,
      workflow.clone(),
      input.clone(),
      variables.clone(),
    )?);

    let mut record = ExecutionRecord::new(&execution_id, &workflow.id, input, variables);
    self.store.create_execution(&record).await?;
    record.status = ExecutionStatus::Running;
    self.store.update_execution(&record).await?;

    Ok((state, record))
  }

  /// Run the waves and finalize the record.
  async fn finish(
    &self,
    state: Arc<ExecutionState>,
    mut record: ExecutionRecord,
    cancel: CancellationToken,
    start_wave: usize,
  ) -> Result<ExecutionRecord, ExecutionError> {
    self.emit(
      &record,
      EventKind::ExecutionStarted {
        input: record.input.clone(),
      },
    );

    let executor = DagExecutor::new(self.registry.clone())
      .with_sink(self.sink.clone())
      .with_checkpoints(self.checkpoints.clone());
    let result = executor
      .run_from(state.clone(), &self.options, cancel, start_wave)
      .await;

    record.completed_at = Some(Utc::now());
    let duration_ms = (Utc::now() - record.started_at)
      .num_milliseconds()
      .try_into()
      .unwrap_or(0);

    match result {
      Ok(()) => {
        let output = final_output(&state);
        record.status = ExecutionStatus::Completed;
        record.output = Some(output.clone());
        self.store.update_execution(&record).await?;
        self.emit(&record, EventKind::ExecutionCompleted { output, duration_ms });
        info!(
          execution_id = %record.execution_id,
          workflow_id = %record.workflow_id,
          duration_ms,
          "execution completed"
        );
      }
      Err(err) => {
        record.status = ExecutionStatus::Failed;
        record.error = Some(err.to_string());
        self.store.update_execution(&record).await?;
        self.emit(
          &record,
          EventKind::ExecutionFailed {
            error: err.to_string(),
          },
        );
        error!(
          execution_id = %record.execution_id,
          workflow_id = %record.workflow_id,
          error = %err,
          "execution failed"
        );
      }
    }

    Ok(record)
  }

  fn emit(&self, record: &ExecutionRecord, kind: EventKind) {
    self.sink.emit(ExecutionEvent::new(
      &record.execution_id,
      &record.workflow_id,
      kind,
    ));
  }
}

/// Workflow-definition variables overlaid with per-run variables; per-run
/// keys win.
fn merge_variables(
  workflow_vars: &HashMap<String, Value>,
  run_vars: HashMap<String, Value>,
) -> HashMap<String, Value> {
  let mut merged = workflow_vars.clone();
  merged.extend(run_vars);
  merged
}

/// The execution's final output, assembled from the leaf nodes.
///
/// A single leaf contributes its output untouched. Several leaves become a
/// mapping keyed by leaf id, with non-map outputs wrapped as `{"value": …}`.
fn final_output(state: &ExecutionState) -> Value {
  let leaves = state.graph().leaves();
  let completed: Vec<(&String, Value)> = leaves
    .iter()
    .filter_map(|id| state.node_output(id).map(|output| (id, output)))
    .collect();

  match (leaves.len(), completed.as_slice()) {
    (_, []) => Value::Null,
    (1, [(_, output)]) => output.clone(),
    _ => Value::Object(
      completed
        .into_iter()
        .map(|(id, output)| (id.clone(), coerce_to_map(output)))
        .collect(),
    ),
  }
}

fn coerce_to_map(output: Value) -> Value {
  match output {
    Value::Object(_) => output,
    other => serde_json::json!({ "value": other }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn merge_gives_run_variables_precedence() {
    let workflow_vars: HashMap<String, Value> = [
      ("region".to_string(), json!("eu")),
      ("tier".to_string(), json!("free")),
    ]
    .into_iter()
    .collect();
    let run_vars: HashMap<String, Value> =
      [("tier".to_string(), json!("pro"))].into_iter().collect();

    let merged = merge_variables(&workflow_vars, run_vars);
    assert_eq!(merged["region"], json!("eu"));
    assert_eq!(merged["tier"], json!("pro"));
  }

  #[test]
  fn coercion_wraps_non_map_outputs() {
    assert_eq!(coerce_to_map(json!({"a": 1})), json!({"a": 1}));
    assert_eq!(coerce_to_map(json!(42)), json!({"value": 42}));
    assert_eq!(coerce_to_map(json!("text")), json!({"value": "text"}));
  }
}
