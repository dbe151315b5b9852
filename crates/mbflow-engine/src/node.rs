//! Single-node dispatch.
//!
//! One dispatch looks up the executor, assembles the direct-parent input,
//! resolves the config templates, and invokes the work item under the node's
//! deadline and a child cancellation token. The retry loop wraps dispatches
//! according to the execution's [`RetryPolicy`](crate::options::RetryPolicy).

use std::sync::Arc;
use std::time::Duration;

use mbflow_expression::{EvaluationContext, ExpressionEngine, TemplateMode};
use mbflow_workflow::Node;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ExecutionError;
use crate::events::{EventKind, EventSink, ExecutionEvent};
use crate::options::ExecutionOptions;
use crate::registry::{ExecutorRegistry, NodeContext};
use crate::state::{ExecutionState, NodeStatus, estimate_size};

/// Everything a worker needs to run nodes of one execution.
pub(crate) struct NodeDispatcher {
  pub state: Arc<ExecutionState>,
  pub registry: Arc<dyn ExecutorRegistry>,
  pub engine: Arc<ExpressionEngine>,
  pub sink: Arc<dyn EventSink>,
  pub options: ExecutionOptions,
}

impl NodeDispatcher {
  pub(crate) fn emit(&self, kind: EventKind) {
    self.sink.emit(ExecutionEvent::new(
      self.state.execution_id(),
      &self.state.workflow().id,
      kind,
    ));
  }

  /// Run one node to a terminal state, retrying failed attempts per policy.
  pub(crate) async fn dispatch_with_retry(
    &self,
    node: &Node,
    cancel: &CancellationToken,
  ) -> Result<Value, ExecutionError> {
    let policy = &self.options.retry;
    let mut attempt = 1u32;

    loop {
      match self.dispatch(node, cancel).await {
        Ok(output) => return Ok(output),
        Err(err) => {
          let exhausted = attempt >= policy.max_attempts;
          let retryable = err.retry_applies()
            && !err.is_cancellation()
            && policy.is_retryable(&err.to_string());

          if exhausted || !retryable {
            self.fail_node(node, &err);
            return Err(err);
          }

          let delay = policy.delay(attempt);
          self.state.record_retry(&node.id);
          self.emit(EventKind::NodeRetrying {
            node_id: node.id.clone(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            error: err.to_string(),
          });
          warn!(
            node_id = %node.id,
            attempt,
            max_attempts = policy.max_attempts,
            ?delay,
            error = %err,
            "node failed, retrying"
          );
          if let Some(on_retry) = &policy.on_retry {
            on_retry(&node.id, attempt);
          }

          // A cancellation during the backoff sleep ends the retry sequence.
          tokio::select! {
            _ = cancel.cancelled() => {
              let cancelled = ExecutionError::Cancelled;
              self.fail_node(node, &cancelled);
              return Err(cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
          }
          attempt += 1;
        }
      }
    }
  }

  /// One attempt: the six dispatch steps.
  async fn dispatch(
    &self,
    node: &Node,
    cancel: &CancellationToken,
  ) -> Result<Value, ExecutionError> {
    if cancel.is_cancelled() {
      return Err(ExecutionError::Cancelled);
    }

    let executor =
      self
        .registry
        .lookup(&node.node_type)
        .ok_or_else(|| ExecutionError::ExecutorNotFound {
          node_type: node.node_type.clone(),
        })?;

    let parent_input = self.state.parent_input(&node.id);

    let mode = if self.options.strict_templates {
      TemplateMode::Strict
    } else {
      TemplateMode::Lenient
    };
    let ctx = EvaluationContext::new(parent_input.clone())
      .with_vars(self.state.variables().clone())
      .with_nodes(self.state.completed_outputs());
    let resolved = self
      .engine
      .resolve_config(&node.config, &ctx, mode)
      .map_err(|err| ExecutionError::TemplateResolution {
        node_id: node.id.clone(),
        message: err.to_string(),
      })?;

    self.state.record_dispatch(
      &node.id,
      parent_input.clone(),
      node.config.clone(),
      resolved.clone(),
    );
    self.emit(EventKind::NodeStarted {
      node_id: node.id.clone(),
      input: parent_input.clone(),
    });

    let child = cancel.child_token();
    let node_ctx = NodeContext {
      execution_id: self.state.execution_id().to_string(),
      workflow_id: self.state.workflow().id.clone(),
      node_id: node.id.clone(),
      cancel: child.clone(),
    };
    let deadline = node_deadline(self.options.node_timeout, node.timeout());

    let invoke = executor.execute(&node_ctx, &resolved, &parent_input);
    let result = tokio::select! {
      _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
      outcome = async {
        match deadline {
          Some(limit) => match tokio::time::timeout(limit, invoke).await {
            Ok(result) => result.map_err(|err| ExecutionError::NodeFailed {
              node_id: node.id.clone(),
              message: err.message,
            }),
            Err(_) => Err(ExecutionError::NodeTimeout {
              node_id: node.id.clone(),
            }),
          },
          None => invoke.await.map_err(|err| ExecutionError::NodeFailed {
            node_id: node.id.clone(),
            message: err.message,
          }),
        }
      } => outcome,
    };

    let output = match result {
      Ok(output) => output,
      Err(err) => {
        // Stop in-flight work that outlived its attempt.
        child.cancel();
        return Err(err);
      }
    };

    if let Some(limit) = self.options.max_output_size {
      let size = estimate_size(&output);
      if size > limit {
        return Err(ExecutionError::OutputTooLarge {
          node_id: node.id.clone(),
          size,
          limit,
        });
      }
    }
    self
      .state
      .record_output(&node.id, output.clone(), self.options.max_total_memory)?;

    let duration_ms = self
      .state
      .node_record(&node.id)
      .and_then(|r| r.duration_ms())
      .unwrap_or(0);
    self.emit(EventKind::NodeCompleted {
      node_id: node.id.clone(),
      output: output.clone(),
      duration_ms,
    });

    Ok(output)
  }

  /// Record the terminal failure and emit `node.failed`.
  ///
  /// A cancellation may arrive before the node was ever dispatched; in that
  /// case there is nothing to record. Lookup and template failures do get
  /// recorded, even though the node never reached `running`.
  fn fail_node(&self, node: &Node, err: &ExecutionError) {
    if err.is_cancellation() && self.state.node_status(&node.id) == NodeStatus::Pending {
      return;
    }
    self.state.record_failure(&node.id, err.to_string());
    let duration_ms = self
      .state
      .node_record(&node.id)
      .and_then(|r| r.duration_ms())
      .unwrap_or(0);
    self.emit(EventKind::NodeFailed {
      node_id: node.id.clone(),
      error: err.to_string(),
      duration_ms,
    });
  }
}

/// The effective deadline: the tighter of the execution-wide node timeout
/// and the node's own `config.timeout`.
fn node_deadline(default: Option<Duration>, from_config: Option<Duration>) -> Option<Duration> {
  match (default, from_config) {
    (Some(a), Some(b)) => Some(a.min(b)),
    (a, b) => a.or(b),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn node_deadline_takes_the_tighter_bound() {
    let short = Duration::from_secs(1);
    let long = Duration::from_secs(10);

    assert_eq!(node_deadline(Some(long), Some(short)), Some(short));
    assert_eq!(node_deadline(Some(short), Some(long)), Some(short));
    assert_eq!(node_deadline(None, Some(short)), Some(short));
    assert_eq!(node_deadline(Some(short), None), Some(short));
    assert_eq!(node_deadline(None, None), None);
  }
}
