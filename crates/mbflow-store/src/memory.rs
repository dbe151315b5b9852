//! In-memory store for tests and the CLI.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mbflow_workflow::Workflow;
use tokio::sync::RwLock;

use crate::types::ExecutionRecord;
use crate::{Store, StoreError};

/// Map-backed [`Store`] implementation.
///
/// Workflows are registered up front with [`MemoryStore::put_workflow`];
/// execution records live for the lifetime of the store.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
  workflows: HashMap<String, Workflow>,
  executions: HashMap<String, ExecutionRecord>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a workflow definition.
  pub async fn put_workflow(&self, workflow: Workflow) {
    self
      .inner
      .write()
      .await
      .workflows
      .insert(workflow.id.clone(), workflow);
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn load_workflow(&self, workflow_id: &str) -> Result<Workflow, StoreError> {
    self
      .inner
      .read()
      .await
      .workflows
      .get(workflow_id)
      .cloned()
      .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))
  }

  async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
    self
      .inner
      .write()
      .await
      .executions
      .insert(record.execution_id.clone(), record.clone());
    Ok(())
  }

  async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    if !inner.executions.contains_key(&record.execution_id) {
      return Err(StoreError::ExecutionNotFound(record.execution_id.clone()));
    }
    inner
      .executions
      .insert(record.execution_id.clone(), record.clone());
    Ok(())
  }

  async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord, StoreError> {
    self
      .inner
      .read()
      .await
      .executions
      .get(execution_id)
      .cloned()
      .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mbflow_workflow::WorkflowStatus;

  fn make_workflow(id: &str) -> Workflow {
    Workflow {
      id: id.to_string(),
      name: "test".to_string(),
      version: 1,
      status: WorkflowStatus::Active,
      variables: HashMap::new(),
      nodes: vec![],
      edges: vec![],
    }
  }

  #[tokio::test]
  async fn load_workflow_round_trips() {
    let store = MemoryStore::new();
    store.put_workflow(make_workflow("wf-1")).await;

    let loaded = store.load_workflow("wf-1").await.unwrap();
    assert_eq!(loaded.id, "wf-1");

    assert!(matches!(
      store.load_workflow("missing").await,
      Err(StoreError::WorkflowNotFound(_))
    ));
  }

  #[tokio::test]
  async fn update_requires_existing_record() {
    let store = MemoryStore::new();
    let record = ExecutionRecord::new("exec-1", "wf-1", serde_json::json!({}), HashMap::new());

    assert!(matches!(
      store.update_execution(&record).await,
      Err(StoreError::ExecutionNotFound(_))
    ));

    store.create_execution(&record).await.unwrap();
    store.update_execution(&record).await.unwrap();
    assert_eq!(store.get_execution("exec-1").await.unwrap(), record);
  }
}
