use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single step in the workflow graph.
///
/// The `node_type` tag selects the executor implementation from the registry;
/// `config` is opaque to the core apart from template expressions and the
/// optional `timeout` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  /// Logical identifier, unique within the workflow (referenced by edges).
  pub id: String,
  /// Display name.
  pub name: String,
  /// Maps to a registered executor implementation.
  #[serde(rename = "type")]
  pub node_type: String,
  /// Arbitrary configuration; may contain `{{ … }}` template expressions.
  #[serde(default)]
  pub config: serde_json::Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata: Option<NodeMetadata>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub position: Option<Position>,
}

/// Optional node metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeMetadata {
  /// Dispatch priority within a wave; higher runs first. Default 0.
  #[serde(default)]
  pub priority: i64,
}

/// Canvas position, carried through for editors. Ignored by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
  pub x: f64,
  pub y: f64,
}

impl Node {
  /// Dispatch priority from metadata (default 0).
  pub fn priority(&self) -> i64 {
    self.metadata.as_ref().map(|m| m.priority).unwrap_or(0)
  }

  /// Per-node timeout from `config.timeout` (seconds), if present.
  ///
  /// Accepts integer or float values; anything else is ignored.
  pub fn timeout(&self) -> Option<Duration> {
    match self.config.get("timeout") {
      Some(serde_json::Value::Number(n)) => n.as_f64().filter(|s| *s > 0.0).map(Duration::from_secs_f64),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn make_node(config: serde_json::Value) -> Node {
    Node {
      id: "a".to_string(),
      name: "A".to_string(),
      node_type: "test".to_string(),
      config,
      metadata: None,
      position: None,
    }
  }

  #[test]
  fn timeout_reads_seconds_from_config() {
    let node = make_node(json!({"timeout": 30}));
    assert_eq!(node.timeout(), Some(Duration::from_secs(30)));

    let node = make_node(json!({"timeout": 0.5}));
    assert_eq!(node.timeout(), Some(Duration::from_millis(500)));
  }

  #[test]
  fn timeout_ignores_invalid_values() {
    assert_eq!(make_node(json!({})).timeout(), None);
    assert_eq!(make_node(json!({"timeout": "soon"})).timeout(), None);
    assert_eq!(make_node(json!({"timeout": 0})).timeout(), None);
  }

  #[test]
  fn priority_defaults_to_zero() {
    assert_eq!(make_node(json!({})).priority(), 0);

    let mut node = make_node(json!({}));
    node.metadata = Some(NodeMetadata { priority: 7 });
    assert_eq!(node.priority(), 7);
  }
}
