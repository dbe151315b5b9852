//! The expression engine: compile-once, evaluate-many.

use std::sync::Arc;

use serde_json::Value;

use crate::ast::Expr;
use crate::cache::{CacheStats, ExpressionCache};
use crate::context::EvaluationContext;
use crate::error::ExpressionError;
use crate::eval::evaluate;
use crate::template::{TemplateMode, resolve_value};

/// Default bound for the compiled-expression cache.
const DEFAULT_CACHE_CAPACITY: usize = 512;

/// Compiles and evaluates expressions with a bounded per-engine cache.
///
/// One engine is shared per execution (behind an `Arc`); the cache is
/// concurrency-safe, so workers resolving templates and edge conditions in
/// parallel reuse each other's compilations.
pub struct ExpressionEngine {
  cache: ExpressionCache,
}

impl ExpressionEngine {
  pub fn new(cache_capacity: usize) -> Self {
    Self {
      cache: ExpressionCache::new(cache_capacity),
    }
  }

  /// Compile an expression, reusing the cached AST when available.
  pub fn compile(&self, text: &str) -> Result<Arc<Expr>, ExpressionError> {
    self.cache.get_or_compile(text)
  }

  /// Compile and evaluate an expression.
  pub fn evaluate(&self, text: &str, ctx: &EvaluationContext) -> Result<Value, ExpressionError> {
    let compiled = self.compile(text)?;
    evaluate(&compiled, ctx)
  }

  /// Compile and evaluate an expression that must produce a boolean.
  pub fn evaluate_bool(&self, text: &str, ctx: &EvaluationContext) -> Result<bool, ExpressionError> {
    match self.evaluate(text, ctx)? {
      Value::Bool(b) => Ok(b),
      other => Err(ExpressionError::Type {
        message: format!("condition produced {other}, expected a boolean"),
      }),
    }
  }

  /// Resolve all `{{ … }}` templates in a JSON value.
  pub fn resolve_config(
    &self,
    config: &Value,
    ctx: &EvaluationContext,
    mode: TemplateMode,
  ) -> Result<Value, ExpressionError> {
    resolve_value(self, config, ctx, mode)
  }

  pub fn cache_stats(&self) -> CacheStats {
    self.cache.stats()
  }
}

impl Default for ExpressionEngine {
  fn default() -> Self {
    Self::new(DEFAULT_CACHE_CAPACITY)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn evaluate_bool_rejects_non_boolean_results() {
    let engine = ExpressionEngine::default();
    let ctx = EvaluationContext::new(json!({}));

    assert!(engine.evaluate_bool("1 == 1", &ctx).unwrap());
    assert!(matches!(
      engine.evaluate_bool("1 + 1", &ctx),
      Err(ExpressionError::Type { .. })
    ));
  }

  #[test]
  fn identical_condition_text_shares_one_compilation() {
    let engine = ExpressionEngine::default();
    let ctx = EvaluationContext::new(json!({})).with_output(json!({"score": 90}));

    engine.evaluate_bool("output.score >= 80", &ctx).unwrap();
    engine.evaluate_bool("output.score >= 80", &ctx).unwrap();

    let stats = engine.cache_stats();
    assert_eq!(stats.misses, 1);
    assert!(stats.hits >= 1);
  }
}
