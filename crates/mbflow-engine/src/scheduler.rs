//! Wave-by-wave DAG scheduler.
//!
//! Waves come precomputed from the graph. For each wave the scheduler
//! decides admission per node (at least one incoming edge must pass), sorts
//! the ready set by priority, dispatches it in parallel under the
//! parallelism cap, and joins every worker before moving on — the wave is a
//! barrier, so nodes of wave *k* always observe completed writes from waves
//! *< k*.
//!
//! Loop back-edges are handled at wave boundaries: when a loop source
//! completes and the edge has fired fewer than `max_iterations` times, the
//! loop body (the target plus the nodes dominated by it, i.e. reachable
//! only through it) is reset to pending and the wave cursor rewinds to the
//! target's wave. A node that is also fed around the loop target keeps its
//! result.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use mbflow_expression::{EvaluationContext, ExpressionEngine};
use mbflow_workflow::{Edge, Transition};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::checkpoint::CheckpointManager;
use crate::error::ExecutionError;
use crate::events::{EventKind, EventSink, ExecutionEvent, NoopSink};
use crate::node::NodeDispatcher;
use crate::options::ExecutionOptions;
use crate::registry::ExecutorRegistry;
use crate::state::{ExecutionState, NodeStatus};

/// Runs one execution's waves to completion.
pub struct DagExecutor {
  registry: Arc<dyn ExecutorRegistry>,
  engine: Arc<ExpressionEngine>,
  sink: Arc<dyn EventSink>,
  checkpoints: Option<Arc<CheckpointManager>>,
}

impl DagExecutor {
  pub fn new(registry: Arc<dyn ExecutorRegistry>) -> Self {
    Self {
      registry,
      engine: Arc::new(ExpressionEngine::default()),
      sink: Arc::new(NoopSink),
      checkpoints: None,
    }
  }

  pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
    self.sink = sink;
    self
  }

  /// Attach a checkpoint manager; snapshots are written at wave boundaries
  /// when the execution options ask for them.
  pub fn with_checkpoints(mut self, checkpoints: Arc<CheckpointManager>) -> Self {
    self.checkpoints = Some(checkpoints);
    self
  }

  /// Run every wave from the beginning.
  pub async fn run(
    &self,
    state: Arc<ExecutionState>,
    options: &ExecutionOptions,
    cancel: CancellationToken,
  ) -> Result<(), ExecutionError> {
    self.run_from(state, options, cancel, 0).await
  }

  /// Run waves starting at `start_wave` (used when resuming a checkpoint).
  #[instrument(skip_all, fields(execution_id = %state.execution_id(), start_wave = start_wave))]
  pub async fn run_from(
    &self,
    state: Arc<ExecutionState>,
    options: &ExecutionOptions,
    cancel: CancellationToken,
    start_wave: usize,
  ) -> Result<(), ExecutionError> {
    // The child token lets the deadline stop in-flight workers without
    // cancelling the caller's token.
    let exec_cancel = cancel.child_token();
    match options.timeout {
      Some(limit) => {
        let loop_fut = self.wave_loop(state, options, exec_cancel.clone(), start_wave);
        match tokio::time::timeout(limit, loop_fut).await {
          Ok(result) => result,
          Err(_) => {
            exec_cancel.cancel();
            Err(ExecutionError::DeadlineExceeded)
          }
        }
      }
      None => self.wave_loop(state, options, exec_cancel, start_wave).await,
    }
  }

  async fn wave_loop(
    &self,
    state: Arc<ExecutionState>,
    options: &ExecutionOptions,
    cancel: CancellationToken,
    start_wave: usize,
  ) -> Result<(), ExecutionError> {
    let waves: Vec<Vec<String>> = state.graph().waves().to_vec();
    let dispatcher = Arc::new(NodeDispatcher {
      state: state.clone(),
      registry: self.registry.clone(),
      engine: self.engine.clone(),
      sink: self.sink.clone(),
      options: options.clone(),
    });

    // Fire counts per loop edge id for this execution.
    let mut loop_fires: HashMap<String, u32> = HashMap::new();
    // Accumulated node failures under continue-on-error.
    let mut failures: Vec<String> = Vec::new();
    let mut wave_index = start_wave;

    while wave_index < waves.len() {
      if cancel.is_cancelled() {
        skip_remaining(&dispatcher, &state);
        return Err(ExecutionError::Cancelled);
      }

      // Admission: a node runs iff at least one incoming edge passes.
      let mut ready: Vec<String> = Vec::new();
      for node_id in &waves[wave_index] {
        if state.node_status(node_id) != NodeStatus::Pending {
          continue;
        }
        match self.admission(&state, node_id) {
          None => ready.push(node_id.clone()),
          Some(reason) => {
            state.record_skip(node_id, &reason);
            dispatcher.emit(EventKind::NodeSkipped {
              node_id: node_id.clone(),
              reason,
            });
          }
        }
      }

      dispatcher.emit(EventKind::WaveStarted {
        wave_index,
        node_ids: ready.clone(),
      });
      info!(wave_index, ready = ?ready, "wave started");

      // Higher priority dispatches first; the sort is stable, so ties keep
      // wave order.
      ready.sort_by_key(|id| {
        Reverse(
          state
            .workflow()
            .get_node(id)
            .map(|n| n.priority())
            .unwrap_or(0),
        )
      });

      let semaphore = (options.max_parallelism > 0)
        .then(|| Arc::new(Semaphore::new(options.max_parallelism)));

      let mut handles = Vec::with_capacity(ready.len());
      for node_id in &ready {
        let node = state.workflow().get_node(node_id).unwrap().clone();
        let dispatcher = dispatcher.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
          let _permit = match &semaphore {
            Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
            None => None,
          };
          let result = dispatcher.dispatch_with_retry(&node, &cancel).await;
          (node.id, result)
        }));
      }

      // The wave barrier. Cancellation exits once current dispatches have
      // observed the token themselves.
      let results = tokio::select! {
        results = join_all(handles) => results,
        _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
      };

      let mut hard_failure: Option<ExecutionError> = None;
      let mut wave_failure: Option<ExecutionError> = None;
      for joined in results {
        let (node_id, outcome) = match joined {
          Ok(pair) => pair,
          Err(join_error) => {
            hard_failure.get_or_insert(ExecutionError::NodeFailed {
              node_id: "unknown".to_string(),
              message: format!("worker join error: {join_error}"),
            });
            continue;
          }
        };

        match outcome {
          Ok(_) => {}
          Err(err)
            if err.is_cancellation()
              || matches!(err, ExecutionError::MemoryLimitExceeded { .. }) =>
          {
            // These abort the execution regardless of continue-on-error.
            hard_failure.get_or_insert(err);
          }
          Err(err) => {
            debug!(node_id = %node_id, error = %err, "node ended in failure");
            failures.push(err.to_string());
            if !options.continue_on_error {
              wave_failure.get_or_insert(err);
            }
          }
        }
      }

      dispatcher.emit(EventKind::WaveCompleted {
        wave_index,
        node_ids: ready.clone(),
      });

      // The wave joined, so nothing is in flight; nodes the abort leaves
      // undispatched end skipped, not pending.
      if let Some(err) = hard_failure {
        skip_remaining(&dispatcher, &state);
        return Err(err);
      }
      if let Some(err) = wave_failure {
        skip_remaining(&dispatcher, &state);
        return Err(err);
      }

      if options.checkpoints {
        if let Some(checkpoints) = &self.checkpoints {
          checkpoints.create(&state, wave_index);
        }
      }

      // Outputs whose every consumer reached a terminal state are no longer
      // needed as inputs. Loop edges can resurrect consumers, so the
      // optimization stays off in workflows that have any.
      if options.memory_opts && state.graph().loop_edges().is_empty() {
        for node_id in state.completed_nodes() {
          let graph = state.graph();
          let mut consumers = graph.outgoing(&node_id).peekable();
          if consumers.peek().is_some()
            && graph
              .outgoing(&node_id)
              .all(|edge| state.node_status(&edge.to).is_terminal())
          {
            state.release_output(&node_id);
          }
        }
      }

      wave_index = match self.fire_loop_edges(&state, &ready, &mut loop_fires) {
        Some(target_wave) => target_wave,
        None => wave_index + 1,
      };
    }

    if !failures.is_empty() {
      return Err(ExecutionError::aggregated(failures));
    }
    Ok(())
  }

  /// Check loop edges whose source completed in this wave; fire those under
  /// their iteration cap, reset the loop body, and return the wave to rewind
  /// to.
  fn fire_loop_edges(
    &self,
    state: &ExecutionState,
    completed_this_wave: &[String],
    loop_fires: &mut HashMap<String, u32>,
  ) -> Option<usize> {
    let mut rewind: Option<usize> = None;

    for edge in state.graph().loop_edges() {
      if !completed_this_wave.contains(&edge.from)
        || state.node_status(&edge.from) != NodeStatus::Completed
      {
        continue;
      }
      let max_iterations = edge.loop_marker.map(|m| m.max_iterations).unwrap_or(0);
      let fires = loop_fires.entry(edge.id.clone()).or_insert(0);
      if *fires >= max_iterations {
        continue;
      }
      *fires += 1;

      let target_wave = state.graph().wave_of(&edge.to).unwrap_or(0);
      info!(
        edge_id = %edge.id,
        target = %edge.to,
        iteration = *fires,
        max_iterations,
        "loop edge fired"
      );

      let body = state.graph().dominated_by(&edge.to);
      state.reset_nodes(&body);
      rewind = Some(rewind.map_or(target_wave, |wave| wave.min(target_wave)));
    }

    rewind
  }

  /// `None` when the node may run, otherwise the skip reason.
  fn admission(&self, state: &ExecutionState, node_id: &str) -> Option<String> {
    let incoming: Vec<&Edge> = state.graph().incoming(node_id).collect();
    if incoming.is_empty() {
      return None;
    }
    for edge in &incoming {
      if self.edge_passes(state, edge) {
        return None;
      }
    }
    Some("no incoming edge passed".to_string())
  }

  /// Evaluate one edge against its source's status and output.
  fn edge_passes(&self, state: &ExecutionState, edge: &Edge) -> bool {
    let source_status = state.node_status(&edge.from);
    if source_status != NodeStatus::Completed {
      // A skipped source and a failed source both fail the edge; the log
      // line keeps the two distinguishable.
      debug!(
        edge_id = %edge.id,
        source = %edge.from,
        status = ?source_status,
        "edge source not completed"
      );
      return false;
    }

    match edge.transition() {
      Transition::Always => true,
      Transition::Condition(text) if text.trim().is_empty() => true,
      Transition::Condition(text) => {
        let output = state.node_output(&edge.from).unwrap_or(Value::Null);
        let ctx = EvaluationContext::new(state.input().clone())
          .with_output(output)
          .with_vars(state.variables().clone())
          .with_nodes(state.completed_outputs());

        // Compile errors, runtime errors, and non-boolean results all fail
        // the edge.
        let passed = match self.engine.evaluate_bool(text, &ctx) {
          Ok(result) => result,
          Err(err) => {
            debug!(edge_id = %edge.id, error = %err, "condition evaluation failed");
            false
          }
        };
        self.sink.emit(ExecutionEvent::new(
          state.execution_id(),
          &state.workflow().id,
          EventKind::ConditionEvaluated {
            edge_id: edge.id.clone(),
            expression: text.to_string(),
            passed,
          },
        ));
        passed
      }
      Transition::SourceHandle(handle) => {
        let output = state.node_output(&edge.from).unwrap_or(Value::Null);
        selects_handle(&output, handle)
      }
      // Loop edges are not part of the admission adjacency.
      Transition::Loop(_) => false,
    }
  }
}

/// Mark every still-pending node skipped when a run aborts between waves.
///
/// Only safe at wave boundaries (no worker in flight). A cancellation or
/// deadline that interrupts a wave mid-dispatch skips this bookkeeping; the
/// state is discarded with the execution record marked failed.
fn skip_remaining(dispatcher: &NodeDispatcher, state: &ExecutionState) {
  const REASON: &str = "execution aborted";
  for node in &state.workflow().nodes {
    if state.node_status(&node.id) == NodeStatus::Pending {
      state.record_skip(&node.id, REASON);
      dispatcher.emit(EventKind::NodeSkipped {
        node_id: node.id.clone(),
        reason: REASON.to_string(),
      });
    }
  }
}

/// Whether a source output selects a named handle.
///
/// `"true"` / `"false"` handles match a boolean output, or the boolean
/// `result` field of a map output. Anything that does not clearly select a
/// branch passes leniently.
fn selects_handle(output: &Value, handle: &str) -> bool {
  let selected = match output {
    Value::Bool(b) => Some(*b),
    Value::Object(map) => match map.get("result") {
      Some(Value::Bool(b)) => Some(*b),
      _ => None,
    },
    _ => None,
  };

  match (handle, selected) {
    ("true", Some(b)) => b,
    ("false", Some(b)) => !b,
    // Custom handles and unselectable outputs pass leniently.
    _ => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn boolean_output_selects_true_false_handles() {
    assert!(selects_handle(&json!(true), "true"));
    assert!(!selects_handle(&json!(true), "false"));
    assert!(selects_handle(&json!(false), "false"));
    assert!(!selects_handle(&json!(false), "true"));
  }

  #[test]
  fn result_field_selects_when_boolean() {
    assert!(selects_handle(&json!({"result": true}), "true"));
    assert!(!selects_handle(&json!({"result": true}), "false"));
    assert!(selects_handle(&json!({"result": false}), "false"));
  }

  #[test]
  fn unselectable_outputs_pass_leniently() {
    // Missing or non-boolean `result`.
    assert!(selects_handle(&json!({"score": 1}), "true"));
    assert!(selects_handle(&json!({"result": "yes"}), "false"));
    // Non-boolean, non-map output.
    assert!(selects_handle(&json!(42), "true"));
    assert!(selects_handle(&json!(null), "false"));
  }

  #[test]
  fn custom_handles_always_pass() {
    assert!(selects_handle(&json!(true), "done"));
    assert!(selects_handle(&json!({"result": false}), "branch-a"));
  }
}
