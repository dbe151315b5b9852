use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("duplicate node id: '{0}'")]
  DuplicateNodeId(String),

  #[error("duplicate edge id: '{0}'")]
  DuplicateEdgeId(String),

  #[error("edge '{edge_id}' references unknown node '{node_id}'")]
  UnknownNodeReference { edge_id: String, node_id: String },

  #[error("edge '{0}' is a self-loop without a loop marker")]
  SelfLoop(String),

  #[error("edge '{0}' carries more than one of condition, sourceHandle, loop")]
  AmbiguousTransition(String),

  #[error("loop edge '{0}' must allow at least one iteration")]
  InvalidLoop(String),

  #[error("cycle detected in workflow graph")]
  CycleDetected,
}
