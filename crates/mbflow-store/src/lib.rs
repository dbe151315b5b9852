//! MBFlow Store
//!
//! This crate provides the persistence port consumed by the execution
//! engine. Real deployments back it with a database; the engine only needs
//! the [`Store`] trait:
//! - Loading workflow definitions by id
//! - Creating and updating execution records
//!
//! [`MemoryStore`] is the map-backed implementation used by tests and the
//! CLI.

mod memory;
mod types;

pub use memory::MemoryStore;
pub use types::{ExecutionRecord, ExecutionStatus};

use async_trait::async_trait;
use mbflow_workflow::Workflow;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// No workflow with the requested id.
  #[error("workflow not found: {0}")]
  WorkflowNotFound(String),

  /// No execution record with the requested id.
  #[error("execution not found: {0}")]
  ExecutionNotFound(String),

  /// The backing store failed.
  #[error("storage backend error: {0}")]
  Backend(String),
}

/// Storage port for workflow definitions and execution records.
#[async_trait]
pub trait Store: Send + Sync {
  /// Load a workflow definition by id.
  async fn load_workflow(&self, workflow_id: &str) -> Result<Workflow, StoreError>;

  /// Create a new execution record.
  async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

  /// Replace an existing execution record.
  async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

  /// Get an execution record by id.
  async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord, StoreError>;
}
