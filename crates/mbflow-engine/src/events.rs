//! Execution events and sinks for observability.
//!
//! The engine emits one-way events through an [`EventSink`]. Consumers
//! decide what to do with them — persist, stream to a UI, log, or ignore.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

/// An event emitted during workflow execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionEvent {
  pub execution_id: String,
  pub workflow_id: String,
  pub timestamp: DateTime<Utc>,
  #[serde(flatten)]
  pub kind: EventKind,
}

impl ExecutionEvent {
  pub fn new(
    execution_id: impl Into<String>,
    workflow_id: impl Into<String>,
    kind: EventKind,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      workflow_id: workflow_id.into(),
      timestamp: Utc::now(),
      kind,
    }
  }
}

/// Event payloads, tagged with the dotted taxonomy name on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum EventKind {
  #[serde(rename = "execution.started")]
  ExecutionStarted { input: serde_json::Value },

  #[serde(rename = "execution.completed")]
  ExecutionCompleted {
    output: serde_json::Value,
    duration_ms: u64,
  },

  #[serde(rename = "execution.failed")]
  ExecutionFailed { error: String },

  #[serde(rename = "wave.started")]
  WaveStarted {
    wave_index: usize,
    node_ids: Vec<String>,
  },

  #[serde(rename = "wave.completed")]
  WaveCompleted {
    wave_index: usize,
    node_ids: Vec<String>,
  },

  #[serde(rename = "node.started")]
  NodeStarted {
    node_id: String,
    input: serde_json::Value,
  },

  #[serde(rename = "node.completed")]
  NodeCompleted {
    node_id: String,
    output: serde_json::Value,
    duration_ms: u64,
  },

  #[serde(rename = "node.failed")]
  NodeFailed {
    node_id: String,
    error: String,
    duration_ms: u64,
  },

  #[serde(rename = "node.skipped")]
  NodeSkipped { node_id: String, reason: String },

  #[serde(rename = "node.retrying")]
  NodeRetrying {
    node_id: String,
    attempt: u32,
    delay_ms: u64,
    error: String,
  },

  #[serde(rename = "condition.evaluated")]
  ConditionEvaluated {
    edge_id: String,
    expression: String,
    passed: bool,
  },
}

impl EventKind {
  /// The taxonomy name of this event.
  pub fn name(&self) -> &'static str {
    match self {
      EventKind::ExecutionStarted { .. } => "execution.started",
      EventKind::ExecutionCompleted { .. } => "execution.completed",
      EventKind::ExecutionFailed { .. } => "execution.failed",
      EventKind::WaveStarted { .. } => "wave.started",
      EventKind::WaveCompleted { .. } => "wave.completed",
      EventKind::NodeStarted { .. } => "node.started",
      EventKind::NodeCompleted { .. } => "node.completed",
      EventKind::NodeFailed { .. } => "node.failed",
      EventKind::NodeSkipped { .. } => "node.skipped",
      EventKind::NodeRetrying { .. } => "node.retrying",
      EventKind::ConditionEvaluated { .. } => "condition.evaluated",
    }
  }
}

/// Trait for receiving execution events.
///
/// The engine calls `emit` for each event; implementations decide what to
/// do with them. Implementations must not block.
pub trait EventSink: Send + Sync {
  fn emit(&self, event: ExecutionEvent);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
  fn emit(&self, _event: ExecutionEvent) {
    // Intentionally empty
  }
}

/// A sink that sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls the engine; the volume is a
/// handful of events per node.
#[derive(Debug, Clone)]
pub struct ChannelSink {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelSink {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Create a sink together with its receiving end.
  pub fn pair() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self { sender }, receiver)
  }
}

impl EventSink for ChannelSink {
  fn emit(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// A sink that writes each event as a structured log line.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
  fn emit(&self, event: ExecutionEvent) {
    info!(
      execution_id = %event.execution_id,
      workflow_id = %event.workflow_id,
      event = event.kind.name(),
      "{}",
      event.kind.name()
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn events_serialize_with_dotted_names() {
    let event = ExecutionEvent::new(
      "exec-1",
      "wf-1",
      EventKind::NodeCompleted {
        node_id: "a".to_string(),
        output: json!({"ok": true}),
        duration_ms: 12,
      },
    );

    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["event"], "node.completed");
    assert_eq!(value["execution_id"], "exec-1");
    assert_eq!(value["node_id"], "a");
  }

  #[test]
  fn channel_sink_delivers_events() {
    let (sink, mut receiver) = ChannelSink::pair();
    sink.emit(ExecutionEvent::new(
      "exec-1",
      "wf-1",
      EventKind::ExecutionStarted { input: json!({}) },
    ));

    let event = receiver.try_recv().unwrap();
    assert_eq!(event.kind.name(), "execution.started");
  }
}
