//! Shared execution state.
//!
//! One [`ExecutionState`] exists per execution and is shared across the
//! workers of a wave behind an `Arc`. All per-node mutation goes through a
//! single reader/writer guard; accessors clone values out and never hold the
//! guard across an await point. A worker reading a predecessor's output
//! always observes it after the status transition to `completed`, which is
//! serialized through the same guard.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use mbflow_workflow::{Graph, Workflow, WorkflowError};

use crate::error::ExecutionError;

/// Status of a single node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  #[default]
  Pending,
  Running,
  Completed,
  Failed,
  Skipped,
  /// Transient, between a failed attempt and the next one.
  Retrying,
}

impl NodeStatus {
  /// Whether this status ends the node's participation in the execution.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped
    )
  }
}

/// Everything recorded about one node during an execution.
#[derive(Debug, Clone, Default)]
pub struct NodeRecord {
  pub status: NodeStatus,
  /// Direct-parent input passed to the executor.
  pub input: Option<Value>,
  /// Output returned by the executor. Readable only once `completed`.
  pub output: Option<Value>,
  /// Config as defined in the workflow.
  pub config: Option<Value>,
  /// Config after template resolution.
  pub resolved_config: Option<Value>,
  pub error: Option<String>,
  pub skip_reason: Option<String>,
  pub started_at: Option<DateTime<Utc>>,
  pub ended_at: Option<DateTime<Utc>>,
  pub retry_count: u32,
}

impl NodeRecord {
  /// Milliseconds between dispatch and completion, when both are known.
  pub fn duration_ms(&self) -> Option<u64> {
    match (self.started_at, self.ended_at) {
      (Some(start), Some(end)) => (end - start).num_milliseconds().try_into().ok(),
      _ => None,
    }
  }
}

struct StateInner {
  nodes: HashMap<String, NodeRecord>,
  /// Sum of `estimate_size` over retained outputs.
  total_output_bytes: u64,
}

/// Thread-safe store of per-node execution data.
pub struct ExecutionState {
  execution_id: String,
  workflow: Arc<Workflow>,
  graph: Graph,
  input: Value,
  variables: HashMap<String, Value>,
  inner: RwLock<StateInner>,
}

impl ExecutionState {
  /// Validate the workflow and seed a fresh state with every node pending.
  ///
  /// `variables` is the merged map: workflow-definition variables overlaid
  /// with per-run variables (per-run keys win).
  pub fn new(
    execution_id: impl Into<String>,
    workflow: Arc<Workflow>,
    input: Value,
    variables: HashMap<String, Value>,
  ) -> Result<Self, WorkflowError> {
    let graph = workflow.graph()?;
    let nodes = workflow
      .nodes
      .iter()
      .map(|n| (n.id.clone(), NodeRecord::default()))
      .collect();

    Ok(Self {
      execution_id: execution_id.into(),
      workflow,
      graph,
      input,
      variables,
      inner: RwLock::new(StateInner {
        nodes,
        total_output_bytes: 0,
      }),
    })
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  pub fn workflow(&self) -> &Arc<Workflow> {
    &self.workflow
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// The execution-level input.
  pub fn input(&self) -> &Value {
    &self.input
  }

  /// The merged variables map.
  pub fn variables(&self) -> &HashMap<String, Value> {
    &self.variables
  }

  pub fn node_status(&self, node_id: &str) -> NodeStatus {
    self
      .inner
      .read()
      .unwrap()
      .nodes
      .get(node_id)
      .map(|r| r.status)
      .unwrap_or_default()
  }

  /// Full record snapshot for one node.
  pub fn node_record(&self, node_id: &str) -> Option<NodeRecord> {
    self.inner.read().unwrap().nodes.get(node_id).cloned()
  }

  /// A node's output, readable only once its status is `completed`.
  pub fn node_output(&self, node_id: &str) -> Option<Value> {
    let inner = self.inner.read().unwrap();
    inner
      .nodes
      .get(node_id)
      .filter(|r| r.status == NodeStatus::Completed)
      .and_then(|r| r.output.clone())
  }

  /// Ids of all completed nodes.
  pub fn completed_nodes(&self) -> Vec<String> {
    let inner = self.inner.read().unwrap();
    let mut ids: Vec<String> = inner
      .nodes
      .iter()
      .filter(|(_, r)| r.status == NodeStatus::Completed)
      .map(|(id, _)| id.clone())
      .collect();
    ids.sort();
    ids
  }

  /// Outputs of all completed nodes, for the `nodes.*` template root and
  /// checkpointing.
  pub fn completed_outputs(&self) -> HashMap<String, Value> {
    let inner = self.inner.read().unwrap();
    inner
      .nodes
      .iter()
      .filter(|(_, r)| r.status == NodeStatus::Completed)
      .filter_map(|(id, r)| r.output.clone().map(|o| (id.clone(), o)))
      .collect()
  }

  /// Terminal statuses, for checkpointing.
  pub fn terminal_statuses(&self) -> HashMap<String, NodeStatus> {
    let inner = self.inner.read().unwrap();
    inner
      .nodes
      .iter()
      .filter(|(_, r)| r.status.is_terminal())
      .map(|(id, r)| (id.clone(), r.status))
      .collect()
  }

  /// Mark a node running and record what it was dispatched with.
  pub fn record_dispatch(&self, node_id: &str, input: Value, config: Value, resolved: Value) {
    let mut inner = self.inner.write().unwrap();
    if let Some(record) = inner.nodes.get_mut(node_id) {
      check_transition(node_id, record.status, NodeStatus::Running);
      record.status = NodeStatus::Running;
      record.input = Some(input);
      record.config = Some(config);
      record.resolved_config = Some(resolved);
      record.started_at = Some(Utc::now());
      record.ended_at = None;
      record.error = None;
    }
  }

  /// Record a successful completion, charging the output against the
  /// memory budget.
  pub fn record_output(
    &self,
    node_id: &str,
    output: Value,
    max_total_memory: Option<u64>,
  ) -> Result<(), ExecutionError> {
    let size = estimate_size(&output);
    let mut inner = self.inner.write().unwrap();

    let total = inner.total_output_bytes.saturating_add(size);
    if let Some(limit) = max_total_memory {
      if total > limit {
        return Err(ExecutionError::MemoryLimitExceeded { used: total, limit });
      }
    }
    inner.total_output_bytes = total;

    if let Some(record) = inner.nodes.get_mut(node_id) {
      check_transition(node_id, record.status, NodeStatus::Completed);
      record.status = NodeStatus::Completed;
      record.output = Some(output);
      record.ended_at = Some(Utc::now());
    }
    Ok(())
  }

  /// Record a terminal failure.
  pub fn record_failure(&self, node_id: &str, error: impl Into<String>) {
    let mut inner = self.inner.write().unwrap();
    if let Some(record) = inner.nodes.get_mut(node_id) {
      check_transition(node_id, record.status, NodeStatus::Failed);
      record.status = NodeStatus::Failed;
      record.error = Some(error.into());
      record.ended_at = Some(Utc::now());
    }
  }

  /// Record a skip with a human-readable reason.
  pub fn record_skip(&self, node_id: &str, reason: impl Into<String>) {
    let mut inner = self.inner.write().unwrap();
    if let Some(record) = inner.nodes.get_mut(node_id) {
      check_transition(node_id, record.status, NodeStatus::Skipped);
      record.status = NodeStatus::Skipped;
      record.skip_reason = Some(reason.into());
      record.ended_at = Some(Utc::now());
    }
  }

  /// Mark a node retrying and bump its attempt counter.
  pub fn record_retry(&self, node_id: &str) {
    let mut inner = self.inner.write().unwrap();
    if let Some(record) = inner.nodes.get_mut(node_id) {
      check_transition(node_id, record.status, NodeStatus::Retrying);
      record.status = NodeStatus::Retrying;
      record.retry_count += 1;
    }
  }

  /// Reset a set of nodes back to pending for a loop iteration.
  ///
  /// Bypasses the monotonic-transition check: loop bodies legitimately run
  /// again. Released/retained outputs are uncharged.
  pub fn reset_nodes(&self, node_ids: &[String]) {
    let mut guard = self.inner.write().unwrap();
    let inner = &mut *guard;
    for node_id in node_ids {
      if let Some(record) = inner.nodes.get_mut(node_id) {
        if let Some(output) = record.output.take() {
          let size = estimate_size(&output);
          inner.total_output_bytes = inner.total_output_bytes.saturating_sub(size);
        }
        let retries = record.retry_count;
        *record = NodeRecord {
          retry_count: retries,
          ..NodeRecord::default()
        };
      }
    }
  }

  /// Drop a retained output once nothing pending can need it.
  pub fn release_output(&self, node_id: &str) {
    let mut guard = self.inner.write().unwrap();
    let inner = &mut *guard;
    if let Some(record) = inner.nodes.get_mut(node_id) {
      if let Some(output) = record.output.take() {
        let size = estimate_size(&output);
        inner.total_output_bytes = inner.total_output_bytes.saturating_sub(size);
      }
    }
  }

  /// Current cumulative output size in bytes.
  pub fn total_output_bytes(&self) -> u64 {
    self.inner.read().unwrap().total_output_bytes
  }

  /// Seed a terminal record when restoring from a checkpoint.
  pub(crate) fn seed_terminal(&self, node_id: &str, status: NodeStatus, output: Option<Value>) {
    let mut inner = self.inner.write().unwrap();
    if let Some(value) = &output {
      inner.total_output_bytes = inner.total_output_bytes.saturating_add(estimate_size(value));
    }
    if let Some(record) = inner.nodes.get_mut(node_id) {
      record.status = status;
      record.output = output;
    }
  }

  /// Build the direct-parent input for a node.
  ///
  /// - No completed parent: the execution input.
  /// - One completed parent: execution input shallow-merged under the
  ///   parent's output; the parent's keys win on collision. A non-object
  ///   parent output replaces the input wholesale.
  /// - Several completed parents: an object keyed by parent logical id.
  pub fn parent_input(&self, node_id: &str) -> Value {
    let mut parents: Vec<&str> = self
      .graph
      .incoming(node_id)
      .map(|edge| edge.from.as_str())
      .collect();
    parents.sort_unstable();
    parents.dedup();

    let inner = self.inner.read().unwrap();
    let completed: Vec<(&str, &Value)> = parents
      .iter()
      .filter_map(|id| {
        inner
          .nodes
          .get(*id)
          .filter(|r| r.status == NodeStatus::Completed)
          .and_then(|r| r.output.as_ref())
          .map(|o| (*id, o))
      })
      .collect();

    match completed.as_slice() {
      [] => self.input.clone(),
      [(_, output)] => match (&self.input, output) {
        (Value::Object(base), Value::Object(over)) => {
          let mut merged = base.clone();
          for (key, value) in over {
            merged.insert(key.clone(), value.clone());
          }
          Value::Object(merged)
        }
        _ => (*output).clone(),
      },
      many => Value::Object(
        many
          .iter()
          .map(|(id, output)| (id.to_string(), (*output).clone()))
          .collect(),
      ),
    }
  }
}

/// Relaxed transition check: log when a caller violates the monotonic
/// status order instead of corrupting state silently.
fn check_transition(node_id: &str, from: NodeStatus, to: NodeStatus) {
  let valid = matches!(
    (from, to),
    (NodeStatus::Pending, NodeStatus::Running)
      | (NodeStatus::Pending, NodeStatus::Skipped)
      // Lookup and template failures never reach `running`.
      | (NodeStatus::Pending, NodeStatus::Failed)
      | (NodeStatus::Running, NodeStatus::Completed)
      | (NodeStatus::Running, NodeStatus::Failed)
      | (NodeStatus::Running, NodeStatus::Retrying)
      | (NodeStatus::Retrying, NodeStatus::Running)
      | (NodeStatus::Retrying, NodeStatus::Failed)
  );
  if !valid {
    warn!(node_id, ?from, ?to, "unexpected node status transition");
  }
}

/// Estimated in-memory size of a JSON value in bytes.
///
/// Strings count their length, arrays and maps recurse, every other scalar
/// costs a small fixed amount.
pub fn estimate_size(value: &Value) -> u64 {
  const SCALAR_COST: u64 = 8;
  match value {
    Value::Null | Value::Bool(_) | Value::Number(_) => SCALAR_COST,
    Value::String(s) => s.len() as u64 + SCALAR_COST,
    Value::Array(items) => items.iter().map(estimate_size).sum::<u64>() + SCALAR_COST,
    Value::Object(map) => {
      map
        .iter()
        .map(|(k, v)| k.len() as u64 + estimate_size(v))
        .sum::<u64>()
        + SCALAR_COST
    }
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

  fn make_edge(id: &str, from: &str, to: &str) -> Edge {
    Edge {
      id: id.to_string(),
      from: from.to_string(),
      to: to.to_string(),
      condition: None,
      source_handle: None,
      loop_marker: None,
    }
  }

  fn make_state(nodes: Vec<Node>, edges: Vec<Edge>, input: Value) -> ExecutionState {
    let workflow = Workflow {
      id: "wf".to_string(),
      name: "test".to_string(),
      version: 1,
      status: WorkflowStatus::Active,
      variables: HashMap::new(),
      nodes,
      edges,
    };
    ExecutionState::new("exec-1", Arc::new(workflow), input, HashMap::new()).unwrap()
  }

  #[test]
  fn output_only_readable_when_completed() {
    let state = make_state(vec![make_node("a")], vec![], json!({}));

    state.record_dispatch("a", json!({}), json!({}), json!({}));
    assert_eq!(state.node_output("a"), None);

    state.record_output("a", json!({"ok": true}), None).unwrap();
    assert_eq!(state.node_output("a"), Some(json!({"ok": true})));
  }

  #[test]
  fn root_node_gets_execution_input() {
    let state = make_state(vec![make_node("a")], vec![], json!({"seed": 1}));
    assert_eq!(state.parent_input("a"), json!({"seed": 1}));
  }

  #[test]
  fn single_parent_merges_over_execution_input() {
    let state = make_state(
      vec![make_node("a"), make_node("b")],
      vec![make_edge("e1", "a", "b")],
      json!({"seed": 1, "shared": "from-input"}),
    );

    state.record_dispatch("a", json!({}), json!({}), json!({}));
    state
      .record_output("a", json!({"shared": "from-parent", "fresh": true}), None)
      .unwrap();

    assert_eq!(
      state.parent_input("b"),
      json!({"seed": 1, "shared": "from-parent", "fresh": true})
    );
  }

  #[test]
  fn multiple_parents_namespace_by_id() {
    let state = make_state(
      vec![make_node("a"), make_node("b"), make_node("c")],
      vec![make_edge("e1", "a", "c"), make_edge("e2", "b", "c")],
      json!({}),
    );

    for id in ["a", "b"] {
      state.record_dispatch(id, json!({}), json!({}), json!({}));
      state.record_output(id, json!({"from": id}), None).unwrap();
    }

    assert_eq!(
      state.parent_input("c"),
      json!({"a": {"from": "a"}, "b": {"from": "b"}})
    );
  }

  #[test]
  fn skipped_parent_does_not_contribute_input() {
    let state = make_state(
      vec![make_node("a"), make_node("b"), make_node("c")],
      vec![make_edge("e1", "a", "c"), make_edge("e2", "b", "c")],
      json!({"seed": 1}),
    );

    state.record_dispatch("a", json!({}), json!({}), json!({}));
    state.record_output("a", json!({"from": "a"}), None).unwrap();
    state.record_skip("b", "no incoming edge passed");

    // Only one completed parent left, so the single-parent merge applies.
    assert_eq!(state.parent_input("c"), json!({"seed": 1, "from": "a"}));
  }

  #[test]
  fn memory_limit_rejects_oversized_totals() {
    let state = make_state(vec![make_node("a"), make_node("b")], vec![], json!({}));

    state.record_dispatch("a", json!({}), json!({}), json!({}));
    state
      .record_output("a", json!("0123456789"), Some(100))
      .unwrap();

    state.record_dispatch("b", json!({}), json!({}), json!({}));
    let err = state
      .record_output("b", json!("x".repeat(200)), Some(100))
      .unwrap_err();
    assert!(matches!(err, ExecutionError::MemoryLimitExceeded { .. }));
  }

  #[test]
  fn release_output_refunds_the_budget() {
    let state = make_state(vec![make_node("a")], vec![], json!({}));
    state.record_dispatch("a", json!({}), json!({}), json!({}));
    state.record_output("a", json!("0123456789"), None).unwrap();

    assert!(state.total_output_bytes() > 0);
    state.release_output("a");
    assert_eq!(state.total_output_bytes(), 0);
  }

  #[test]
  fn reset_returns_nodes_to_pending() {
    let state = make_state(vec![make_node("a")], vec![], json!({}));
    state.record_dispatch("a", json!({}), json!({}), json!({}));
    state.record_output("a", json!({"ok": true}), None).unwrap();

    state.reset_nodes(&["a".to_string()]);
    assert_eq!(state.node_status("a"), NodeStatus::Pending);
    assert_eq!(state.node_output("a"), None);
    assert_eq!(state.total_output_bytes(), 0);
  }

  #[test]
  fn size_estimation_counts_strings_and_recurses() {
    assert_eq!(estimate_size(&json!(null)), 8);
    assert_eq!(estimate_size(&json!("abcd")), 12);
    assert_eq!(estimate_size(&json!([1, 2])), 24);
    // key "k" (1) + string "ab" (10) + object overhead (8)
    assert_eq!(estimate_size(&json!({"k": "ab"})), 19);
  }
}
