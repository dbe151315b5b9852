use serde::{Deserialize, Serialize};

/// Directed edge between two nodes.
///
/// An edge carries at most one of `condition`, `source_handle`, or `loop`;
/// an edge with none of them always passes once its source completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
  pub id: String,
  pub from: String,
  pub to: String,
  /// Boolean expression evaluated against the source node's output.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
  /// Named outgoing port of the source node (`"true"` / `"false"` / custom).
  #[serde(rename = "sourceHandle", default, skip_serializing_if = "Option::is_none")]
  pub source_handle: Option<String>,
  /// Back-edge marker; loop edges are excluded from wave computation.
  #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
  pub loop_marker: Option<LoopMarker>,
}

/// Iteration cap for a loop edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopMarker {
  pub max_iterations: u32,
}

/// The transition an edge carries, derived from its optional fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<'a> {
  /// Always pass once the source completes.
  Always,
  Condition(&'a str),
  SourceHandle(&'a str),
  Loop(LoopMarker),
}

impl Edge {
  /// Whether this is a loop back-edge.
  pub fn is_loop(&self) -> bool {
    self.loop_marker.is_some()
  }

  /// The transition view of this edge.
  ///
  /// Assumes the edge passed validation; with more than one field set the
  /// loop marker wins, then the condition.
  pub fn transition(&self) -> Transition<'_> {
    if let Some(marker) = self.loop_marker {
      Transition::Loop(marker)
    } else if let Some(cond) = &self.condition {
      Transition::Condition(cond)
    } else if let Some(handle) = &self.source_handle {
      Transition::SourceHandle(handle)
    } else {
      Transition::Always
    }
  }

  /// Number of transition fields set. Valid edges have at most one.
  pub(crate) fn transition_count(&self) -> usize {
    usize::from(self.condition.is_some())
      + usize::from(self.source_handle.is_some())
      + usize::from(self.loop_marker.is_some())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn make_edge(id: &str) -> Edge {
    Edge {
      id: id.to_string(),
      from: "a".to_string(),
      to: "b".to_string(),
      condition: None,
      source_handle: None,
      loop_marker: None,
    }
  }

  #[test]
  fn plain_edge_is_always() {
    assert_eq!(make_edge("e1").transition(), Transition::Always);
  }

  #[test]
  fn source_handle_round_trips_camel_case() {
    let mut edge = make_edge("e1");
    edge.source_handle = Some("true".to_string());

    let json = serde_json::to_value(&edge).unwrap();
    assert_eq!(json["sourceHandle"], "true");

    let back: Edge = serde_json::from_value(json).unwrap();
    assert_eq!(back.transition(), Transition::SourceHandle("true"));
  }

  #[test]
  fn loop_marker_deserializes_from_loop_key() {
    let edge: Edge = serde_json::from_value(serde_json::json!({
      "id": "e1",
      "from": "b",
      "to": "a",
      "loop": {"max_iterations": 3}
    }))
    .unwrap();

    assert!(edge.is_loop());
    assert_eq!(
      edge.transition(),
      Transition::Loop(LoopMarker { max_iterations: 3 })
    );
  }
}
