use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Completed,
  Failed,
}

/// A workflow execution as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
  pub execution_id: String,
  pub workflow_id: String,
  pub status: ExecutionStatus,
  /// The input the execution was started with.
  pub input: serde_json::Value,
  /// Merged workflow + per-run variables.
  #[serde(default)]
  pub variables: HashMap<String, serde_json::Value>,
  /// Final output; set when the execution completes.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
  /// Terminal error message; set when the execution fails.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub started_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
  /// Create a fresh pending record.
  pub fn new(
    execution_id: impl Into<String>,
    workflow_id: impl Into<String>,
    input: serde_json::Value,
    variables: HashMap<String, serde_json::Value>,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      workflow_id: workflow_id.into(),
      status: ExecutionStatus::Pending,
      input,
      variables,
      output: None,
      error: None,
      started_at: Utc::now(),
      completed_at: None,
    }
  }
}
