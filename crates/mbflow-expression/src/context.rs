use std::collections::HashMap;

use serde_json::Value;

/// The data an expression evaluates against.
///
/// Roots:
/// - `input` — the node's direct-parent input.
/// - `output` — the source node's output (edge conditions only).
/// - `vars` / `env` — the merged execution variables.
/// - `nodes` — outputs of previously completed nodes, keyed by logical id.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
  input: Value,
  output: Option<Value>,
  vars: Value,
  nodes: Value,
}

impl EvaluationContext {
  pub fn new(input: Value) -> Self {
    Self {
      input,
      output: None,
      vars: Value::Object(serde_json::Map::new()),
      nodes: Value::Object(serde_json::Map::new()),
    }
  }

  /// Attach a source-node output (for edge conditions).
  pub fn with_output(mut self, output: Value) -> Self {
    self.output = Some(output);
    self
  }

  /// Attach the merged execution variables.
  pub fn with_vars(mut self, vars: HashMap<String, Value>) -> Self {
    self.vars = Value::Object(vars.into_iter().collect());
    self
  }

  /// Attach completed-node outputs keyed by logical id.
  pub fn with_nodes(mut self, nodes: HashMap<String, Value>) -> Self {
    self.nodes = Value::Object(nodes.into_iter().collect());
    self
  }

  /// Resolve a path root. `None` means the root itself is unknown or absent.
  pub fn root(&self, name: &str) -> Option<&Value> {
    match name {
      "input" => Some(&self.input),
      "output" => self.output.as_ref(),
      "vars" | "env" => Some(&self.vars),
      "nodes" => Some(&self.nodes),
      _ => None,
    }
  }
}
