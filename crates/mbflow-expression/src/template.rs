//! `{{ … }}` template resolution over JSON values.
//!
//! A string value that is exactly one expression resolves to the native JSON
//! value of the lookup. Expressions embedded in a larger string are
//! interpolated as text. Maps and arrays are walked recursively; non-string
//! scalars pass through untouched.

use serde_json::Value;

use crate::context::EvaluationContext;
use crate::engine::ExpressionEngine;
use crate::error::ExpressionError;
use crate::eval::evaluate;

/// How unresolved paths are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplateMode {
  /// Unresolved path fails the resolution.
  Strict,
  /// Unresolved path becomes null (renders as the empty string).
  #[default]
  Lenient,
}

/// One piece of a scanned template string.
#[derive(Debug, PartialEq)]
enum Part<'a> {
  Text(&'a str),
  Expression(&'a str),
}

/// Split a string into literal text and `{{ … }}` expression parts.
///
/// An opening `{{` without a closing `}}` is kept as literal text.
fn scan(text: &str) -> Vec<Part<'_>> {
  let mut parts = Vec::new();
  let mut rest = text;

  while let Some(open) = rest.find("{{") {
    match rest[open + 2..].find("}}") {
      Some(close) => {
        if open > 0 {
          parts.push(Part::Text(&rest[..open]));
        }
        parts.push(Part::Expression(rest[open + 2..open + 2 + close].trim()));
        rest = &rest[open + 2 + close + 2..];
      }
      None => break,
    }
  }
  if !rest.is_empty() {
    parts.push(Part::Text(rest));
  }

  parts
}

/// Render a resolved value for interpolation into a larger string.
///
/// Strings stay raw, null renders empty, everything else is compact JSON.
pub fn render_value(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    other => serde_json::to_string(other).unwrap_or_default(),
  }
}

/// Resolve all templates in one string value.
pub(crate) fn resolve_string(
  engine: &ExpressionEngine,
  text: &str,
  ctx: &EvaluationContext,
  mode: TemplateMode,
) -> Result<Value, ExpressionError> {
  let parts = scan(text);

  let resolve_one = |expression: &str| -> Result<Value, ExpressionError> {
    let compiled = engine.compile(expression)?;
    match evaluate(&compiled, ctx) {
      Ok(value) => Ok(value),
      Err(err) if err.is_path_not_found() && mode == TemplateMode::Lenient => Ok(Value::Null),
      Err(err) => Err(err),
    }
  };

  match parts.as_slice() {
    [] => Ok(Value::String(String::new())),
    // A whole-string expression keeps the native type of the lookup.
    [Part::Expression(expression)] => resolve_one(expression),
    parts => {
      if !parts.iter().any(|p| matches!(p, Part::Expression(_))) {
        return Ok(Value::String(text.to_string()));
      }
      let mut rendered = String::with_capacity(text.len());
      for part in parts {
        match part {
          Part::Text(chunk) => rendered.push_str(chunk),
          Part::Expression(expression) => rendered.push_str(&render_value(&resolve_one(expression)?)),
        }
      }
      Ok(Value::String(rendered))
    }
  }
}

/// Recursively resolve templates in a JSON value.
pub(crate) fn resolve_value(
  engine: &ExpressionEngine,
  value: &Value,
  ctx: &EvaluationContext,
  mode: TemplateMode,
) -> Result<Value, ExpressionError> {
  match value {
    Value::String(text) => resolve_string(engine, text, ctx, mode),
    Value::Array(items) => items
      .iter()
      .map(|item| resolve_value(engine, item, ctx, mode))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::Array),
    Value::Object(map) => map
      .iter()
      .map(|(key, item)| Ok((key.clone(), resolve_value(engine, item, ctx, mode)?)))
      .collect::<Result<serde_json::Map<_, _>, ExpressionError>>()
      .map(Value::Object),
    other => Ok(other.clone()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn make_ctx() -> EvaluationContext {
    EvaluationContext::new(json!({"name": "ada", "count": 3, "flags": {"on": true}}))
      .with_vars([("region".to_string(), json!("eu"))].into_iter().collect())
  }

  fn resolve(text: &str, mode: TemplateMode) -> Result<Value, ExpressionError> {
    let engine = ExpressionEngine::default();
    resolve_string(&engine, text, &make_ctx(), mode)
  }

  #[test]
  fn whole_string_expression_keeps_native_type() {
    assert_eq!(resolve("{{ input.count }}", TemplateMode::Strict).unwrap(), json!(3));
    assert_eq!(
      resolve("{{ input.flags }}", TemplateMode::Strict).unwrap(),
      json!({"on": true})
    );
  }

  #[test]
  fn embedded_expression_interpolates_as_text() {
    assert_eq!(
      resolve("{{ input.name }} has {{ input.count }}", TemplateMode::Strict).unwrap(),
      json!("ada has 3")
    );
  }

  #[test]
  fn strict_mode_fails_on_missing_path() {
    let err = resolve("{{ input.missing }}", TemplateMode::Strict).unwrap_err();
    assert!(err.is_path_not_found());
  }

  #[test]
  fn lenient_mode_renders_missing_as_empty() {
    assert_eq!(resolve("{{ input.missing }}", TemplateMode::Lenient).unwrap(), json!(null));
    assert_eq!(
      resolve("x={{ input.missing }}!", TemplateMode::Lenient).unwrap(),
      json!("x=!")
    );
  }

  #[test]
  fn plain_text_passes_through() {
    assert_eq!(resolve("no templates", TemplateMode::Strict).unwrap(), json!("no templates"));
    assert_eq!(resolve("", TemplateMode::Strict).unwrap(), json!(""));
  }

  #[test]
  fn unclosed_braces_are_literal() {
    assert_eq!(
      resolve("{{ input.name", TemplateMode::Strict).unwrap(),
      json!("{{ input.name")
    );
  }

  #[test]
  fn resolve_value_walks_nested_configs() {
    let engine = ExpressionEngine::default();
    let config = json!({
      "url": "https://{{ vars.region }}.example.com",
      "retries": 2,
      "headers": ["x-count: {{ input.count }}"]
    });

    let resolved = resolve_value(&engine, &config, &make_ctx(), TemplateMode::Strict).unwrap();
    assert_eq!(
      resolved,
      json!({
        "url": "https://eu.example.com",
        "retries": 2,
        "headers": ["x-count: 3"]
      })
    );
  }
}
