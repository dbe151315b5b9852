//! Wave-boundary checkpoints.
//!
//! A checkpoint is a serializable snapshot of everything needed to resume an
//! execution: completed-node outputs and terminal statuses, the merged
//! variables, and the index of the last finished wave. The manager keeps the
//! latest checkpoint per execution in process-local memory; persisting the
//! JSON elsewhere is the embedder's concern.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mbflow_workflow::Workflow;

use crate::error::ExecutionError;
use crate::state::{ExecutionState, NodeStatus};

/// Snapshot of an execution at a wave boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCheckpoint {
  pub execution_id: String,
  pub workflow_id: String,
  /// Index of the last completed wave; resume starts at the next one.
  pub wave_index: usize,
  pub timestamp: DateTime<Utc>,
  pub completed_nodes: Vec<String>,
  pub node_outputs: HashMap<String, Value>,
  pub node_statuses: HashMap<String, NodeStatus>,
  pub variables: HashMap<String, Value>,
}

/// Process-local store of the latest checkpoint per execution.
#[derive(Default)]
pub struct CheckpointManager {
  checkpoints: RwLock<HashMap<String, ExecutionCheckpoint>>,
}

impl CheckpointManager {
  pub fn new() -> Self {
    Self::default()
  }

  /// Snapshot the state after `wave_index` completed, replacing any earlier
  /// checkpoint for the same execution.
  ///
  /// A loop-edge rewind legitimately produces a later checkpoint with a
  /// smaller wave index; the latest snapshot still wins.
  pub fn create(&self, state: &ExecutionState, wave_index: usize) -> ExecutionCheckpoint {
    let checkpoint = ExecutionCheckpoint {
      execution_id: state.execution_id().to_string(),
      workflow_id: state.workflow().id.clone(),
      wave_index,
      timestamp: Utc::now(),
      completed_nodes: state.completed_nodes(),
      node_outputs: state.completed_outputs(),
      node_statuses: state.terminal_statuses(),
      variables: state.variables().clone(),
    };

    self
      .checkpoints
      .write()
      .unwrap()
      .insert(checkpoint.execution_id.clone(), checkpoint.clone());
    checkpoint
  }

  /// The latest checkpoint for an execution, if any.
  pub fn latest(&self, execution_id: &str) -> Option<ExecutionCheckpoint> {
    self.checkpoints.read().unwrap().get(execution_id).cloned()
  }

  /// Drop the stored checkpoint once an execution is finalized.
  pub fn remove(&self, execution_id: &str) {
    self.checkpoints.write().unwrap().remove(execution_id);
  }

  /// Reject checkpoints that do not belong to this workflow.
  pub fn validate(
    checkpoint: &ExecutionCheckpoint,
    workflow: &Workflow,
  ) -> Result<(), ExecutionError> {
    if checkpoint.workflow_id != workflow.id {
      return Err(ExecutionError::InvalidCheckpoint(format!(
        "checkpoint belongs to workflow '{}', not '{}'",
        checkpoint.workflow_id, workflow.id
      )));
    }
    for node_id in checkpoint
      .completed_nodes
      .iter()
      .chain(checkpoint.node_statuses.keys())
    {
      if workflow.get_node(node_id).is_none() {
        return Err(ExecutionError::InvalidCheckpoint(format!(
          "checkpoint references unknown node '{node_id}'"
        )));
      }
    }
    Ok(())
  }

  /// Build a fresh state seeded from a checkpoint.
  ///
  /// Returns the state and the wave index the scheduler should start at.
  pub fn restore(
    checkpoint: &ExecutionCheckpoint,
    workflow: Arc<Workflow>,
    input: Value,
  ) -> Result<(ExecutionState, usize), ExecutionError> {
    Self::validate(checkpoint, &workflow)?;

    let state = ExecutionState::new(
      checkpoint.execution_id.clone(),
      workflow,
      input,
      checkpoint.variables.clone(),
    )?;

    for (node_id, status) in &checkpoint.node_statuses {
      state.seed_terminal(node_id, *status, checkpoint.node_outputs.get(node_id).cloned());
    }

    Ok((state, checkpoint.wave_index + 1))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mbflow_workflow::{Edge, Node, WorkflowStatus};
  use serde_json::json;

  fn make_node(id: &str) -> Node {
    Node {
      id: id.to_string(),
      name: id.to_uppercase(),
      node_type: "test".to_string(),
      config: json!({}),
      metadata: None,
      position: None,
    }
  }

  fn make_workflow(id: &str) -> Workflow {
    Workflow {
      id: id.to_string(),
      name: "test".to_string(),
      version: 1,
      status: WorkflowStatus::Active,
      variables: HashMap::new(),
      nodes: vec![make_node("a"), make_node("b")],
      edges: vec![Edge {
        id: "e1".to_string(),
        from: "a".to_string(),
        to: "b".to_string(),
        condition: None,
        source_handle: None,
        loop_marker: None,
      }],
    }
  }

  fn make_state(workflow: &Workflow) -> ExecutionState {
    ExecutionState::new(
      "exec-1",
      Arc::new(workflow.clone()),
      json!({"seed": 1}),
      HashMap::new(),
    )
    .unwrap()
  }

  #[test]
  fn serialization_round_trips_every_field() {
    let workflow = make_workflow("wf-1");
    let state = make_state(&workflow);
    state.record_dispatch("a", json!({}), json!({}), json!({}));
    state.record_output("a", json!({"ok": true}), None).unwrap();
    state.record_skip("b", "no incoming edge passed");

    let manager = CheckpointManager::new();
    let checkpoint = manager.create(&state, 0);

    let serialized = serde_json::to_string(&checkpoint).unwrap();
    let restored: ExecutionCheckpoint = serde_json::from_str(&serialized).unwrap();
    assert_eq!(restored, checkpoint);
    assert_eq!(restored.completed_nodes, vec!["a"]);
    assert_eq!(restored.node_outputs["a"], json!({"ok": true}));
    assert_eq!(restored.node_statuses["b"], NodeStatus::Skipped);
  }

  #[test]
  fn validate_rejects_foreign_checkpoints() {
    let workflow = make_workflow("wf-1");
    let state = make_state(&workflow);
    let manager = CheckpointManager::new();
    let mut checkpoint = manager.create(&state, 0);

    let other = make_workflow("wf-2");
    assert!(matches!(
      CheckpointManager::validate(&checkpoint, &other),
      Err(ExecutionError::InvalidCheckpoint(_))
    ));

    checkpoint.workflow_id = "wf-1".to_string();
    checkpoint
      .node_statuses
      .insert("ghost".to_string(), NodeStatus::Completed);
    assert!(matches!(
      CheckpointManager::validate(&checkpoint, &workflow),
      Err(ExecutionError::InvalidCheckpoint(_))
    ));
  }

  #[test]
  fn restore_seeds_completed_outputs() {
    let workflow = make_workflow("wf-1");
    let state = make_state(&workflow);
    state.record_dispatch("a", json!({}), json!({}), json!({}));
    state.record_output("a", json!({"ok": true}), None).unwrap();

    let manager = CheckpointManager::new();
    let checkpoint = manager.create(&state, 0);

    let (restored, next_wave) =
      CheckpointManager::restore(&checkpoint, Arc::new(workflow), json!({"seed": 1})).unwrap();

    assert_eq!(next_wave, 1);
    assert_eq!(restored.node_status("a"), NodeStatus::Completed);
    assert_eq!(restored.node_output("a"), Some(json!({"ok": true})));
    assert_eq!(restored.node_status("b"), NodeStatus::Pending);
  }

  #[test]
  fn latest_tracks_the_newest_snapshot() {
    let workflow = make_workflow("wf-1");
    let state = make_state(&workflow);
    let manager = CheckpointManager::new();

    manager.create(&state, 0);
    manager.create(&state, 1);

    assert_eq!(manager.latest("exec-1").unwrap().wave_index, 1);
    manager.remove("exec-1");
    assert!(manager.latest("exec-1").is_none());
  }
}
