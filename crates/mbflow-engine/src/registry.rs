//! Executor lookup port.
//!
//! Work items are external implementations; the engine only looks them up by
//! the node's type tag. Registration is the embedder's concern.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Identity and cancellation for one node invocation.
///
/// The token is a child of the execution-wide token, capped by the node's
/// deadline; executors doing long work should watch it.
#[derive(Debug, Clone)]
pub struct NodeContext {
  pub execution_id: String,
  pub workflow_id: String,
  pub node_id: String,
  pub cancel: CancellationToken,
}

/// Error returned by an executor implementation.
///
/// The message is what retry policies match their substrings against.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ExecutorError {
  pub message: String,
}

impl ExecutorError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// A work-item implementation for one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
  /// Run the work item with its resolved config and direct-parent input.
  async fn execute(
    &self,
    ctx: &NodeContext,
    config: &serde_json::Value,
    input: &serde_json::Value,
  ) -> Result<serde_json::Value, ExecutorError>;
}

/// Lookup port consumed by the engine.
pub trait ExecutorRegistry: Send + Sync {
  fn lookup(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>>;
}

/// Map-backed registry for embedders that register executors in-process.
#[derive(Default)]
pub struct InMemoryRegistry {
  executors: RwLock<HashMap<String, Arc<dyn NodeExecutor>>>,
}

impl InMemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register an executor for a node type, replacing any previous one.
  pub fn register(&self, node_type: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
    self
      .executors
      .write()
      .unwrap()
      .insert(node_type.into(), executor);
  }
}

impl ExecutorRegistry for InMemoryRegistry {
  fn lookup(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
    self.executors.read().unwrap().get(node_type).cloned()
  }
}
