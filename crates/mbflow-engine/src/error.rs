//! Engine error types.

use mbflow_store::StoreError;
use mbflow_workflow::WorkflowError;
use thiserror::Error;

/// Errors produced while preparing or running an execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
  /// The workflow definition failed validation; no wave was started.
  #[error("invalid workflow: {0}")]
  InvalidWorkflow(#[from] WorkflowError),

  /// The store failed or did not know the workflow/execution.
  #[error(transparent)]
  Store(#[from] StoreError),

  /// No executor implementation registered for the node's type tag.
  #[error("no executor registered for node type '{node_type}'")]
  ExecutorNotFound { node_type: String },

  /// Strict-mode template resolution failed.
  #[error("template resolution failed for node '{node_id}': {message}")]
  TemplateResolution { node_id: String, message: String },

  /// The executor returned an error.
  #[error("node '{node_id}' failed: {message}")]
  NodeFailed { node_id: String, message: String },

  /// The per-node deadline elapsed.
  #[error("node '{node_id}' timed out")]
  NodeTimeout { node_id: String },

  /// A single node output exceeded the configured size limit.
  #[error("node '{node_id}' output of {size} bytes exceeds the limit of {limit} bytes")]
  OutputTooLarge { node_id: String, size: u64, limit: u64 },

  /// Cumulative output size exceeded the configured memory limit.
  #[error("execution memory of {used} bytes exceeds the limit of {limit} bytes")]
  MemoryLimitExceeded { used: u64, limit: u64 },

  /// The execution's cancellation token was triggered.
  #[error("execution cancelled")]
  Cancelled,

  /// The execution-wide timeout elapsed.
  #[error("execution deadline exceeded")]
  DeadlineExceeded,

  /// Accumulated node failures under continue-on-error.
  #[error("{message}")]
  Aggregated { message: String, errors: Vec<String> },

  /// A checkpoint did not match the workflow it was restored against.
  #[error("invalid checkpoint: {0}")]
  InvalidCheckpoint(String),
}

impl ExecutionError {
  /// Cancellation and deadline errors are never retried and abort promptly.
  pub fn is_cancellation(&self) -> bool {
    matches!(self, ExecutionError::Cancelled | ExecutionError::DeadlineExceeded)
  }

  /// Whether this error kind is subject to the retry policy at all.
  ///
  /// Registry misses and resource-limit violations fail immediately;
  /// executor failures, per-node timeouts and template errors retry per
  /// policy.
  pub(crate) fn retry_applies(&self) -> bool {
    matches!(
      self,
      ExecutionError::NodeFailed { .. }
        | ExecutionError::NodeTimeout { .. }
        | ExecutionError::TemplateResolution { .. }
    )
  }

  /// Build the continue-on-error aggregate.
  pub(crate) fn aggregated(errors: Vec<String>) -> Self {
    ExecutionError::Aggregated {
      message: format!("{} node(s) failed during execution", errors.len()),
      errors,
    }
  }
}
