use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::graph::Graph;
use crate::node::Node;
use crate::error::WorkflowError;

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
  Draft,
  Active,
  Archived,
}

/// A complete workflow definition.
///
/// This is the wire format persisted by the store and submitted by clients.
/// It is not validated on deserialization; call [`Workflow::graph`] to
/// validate the structure and obtain the traversal form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub id: String,
  pub name: String,
  pub version: u32,
  pub status: WorkflowStatus,
  /// Workflow-level variables, exposed to templates as `vars.*` / `env.*`.
  /// Per-run variables override these on key collision.
  #[serde(default)]
  pub variables: HashMap<String, serde_json::Value>,
  pub nodes: Vec<Node>,
  pub edges: Vec<Edge>,
}

impl Workflow {
  /// Validate the definition and build the graph structure for traversal.
  pub fn graph(&self) -> Result<Graph, WorkflowError> {
    Graph::build(self)
  }

  /// Get a node by its logical id.
  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.iter().find(|n| n.id == node_id)
  }
}
