//! AST evaluation against an [`EvaluationContext`].
//!
//! Semantics:
//! - Arithmetic works on numbers (`f64`); `+` also concatenates strings.
//! - `==` / `!=` compare whole values, with numbers compared numerically.
//! - Ordering compares numbers or strings.
//! - `&&` / `||` require boolean operands and short-circuit.
//! - An unresolvable path is [`ExpressionError::PathNotFound`], which the
//!   template layer maps to null in lenient mode.

use serde_json::Value;

use crate::ast::{BinaryOp, Expr, Path, Segment, UnaryOp};
use crate::context::EvaluationContext;
use crate::error::ExpressionError;

/// Evaluate a compiled expression.
pub fn evaluate(expr: &Expr, ctx: &EvaluationContext) -> Result<Value, ExpressionError> {
  match expr {
    Expr::Literal(value) => Ok(value.clone()),
    Expr::Path(path) => resolve_path(path, ctx),
    Expr::Unary { op, operand } => {
      let value = evaluate(operand, ctx)?;
      match op {
        UnaryOp::Not => match value {
          Value::Bool(b) => Ok(Value::Bool(!b)),
          other => Err(type_error(format!("'!' needs a boolean, got {}", kind(&other)))),
        },
        UnaryOp::Neg => match value.as_f64() {
          Some(n) => Ok(number(-n)),
          None => Err(type_error(format!("'-' needs a number, got {}", kind(&value)))),
        },
      }
    }
    Expr::Binary { op, left, right } => evaluate_binary(*op, left, right, ctx),
  }
}

fn evaluate_binary(
  op: BinaryOp,
  left: &Expr,
  right: &Expr,
  ctx: &EvaluationContext,
) -> Result<Value, ExpressionError> {
  // Boolean connectives short-circuit, so the right side is only evaluated
  // when it can still change the result.
  if matches!(op, BinaryOp::And | BinaryOp::Or) {
    let lhs = as_bool(evaluate(left, ctx)?, op)?;
    return match (op, lhs) {
      (BinaryOp::And, false) => Ok(Value::Bool(false)),
      (BinaryOp::Or, true) => Ok(Value::Bool(true)),
      _ => Ok(Value::Bool(as_bool(evaluate(right, ctx)?, op)?)),
    };
  }

  let lhs = evaluate(left, ctx)?;
  let rhs = evaluate(right, ctx)?;

  match op {
    BinaryOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
    BinaryOp::Ne => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
    BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &lhs, &rhs),
    BinaryOp::Add => match (&lhs, &rhs) {
      (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
      _ => arithmetic(op, &lhs, &rhs),
    },
    BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, &lhs, &rhs),
    BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
  }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ExpressionError> {
  let (a, b) = match (lhs.as_f64(), rhs.as_f64()) {
    (Some(a), Some(b)) => (a, b),
    _ => {
      return Err(type_error(format!(
        "arithmetic needs numbers, got {} and {}",
        kind(lhs),
        kind(rhs)
      )));
    }
  };

  let result = match op {
    BinaryOp::Add => a + b,
    BinaryOp::Sub => a - b,
    BinaryOp::Mul => a * b,
    BinaryOp::Div => {
      if b == 0.0 {
        return Err(type_error("division by zero".to_string()));
      }
      a / b
    }
    BinaryOp::Rem => {
      if b == 0.0 {
        return Err(type_error("division by zero".to_string()));
      }
      a % b
    }
    _ => unreachable!(),
  };

  Ok(number(result))
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ExpressionError> {
  let ordering = match (lhs, rhs) {
    (Value::String(a), Value::String(b)) => a.cmp(b),
    _ => match (lhs.as_f64(), rhs.as_f64()) {
      (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| type_error("numbers do not compare".to_string()))?,
      _ => {
        return Err(type_error(format!(
          "comparison needs numbers or strings, got {} and {}",
          kind(lhs),
          kind(rhs)
        )));
      }
    },
  };

  let result = match op {
    BinaryOp::Lt => ordering.is_lt(),
    BinaryOp::Le => ordering.is_le(),
    BinaryOp::Gt => ordering.is_gt(),
    BinaryOp::Ge => ordering.is_ge(),
    _ => unreachable!(),
  };
  Ok(Value::Bool(result))
}

/// Numbers compare numerically so `80 == 80.0`; everything else structurally.
fn values_equal(lhs: &Value, rhs: &Value) -> bool {
  match (lhs.as_f64(), rhs.as_f64()) {
    (Some(a), Some(b)) => a == b,
    _ => lhs == rhs,
  }
}

fn resolve_path(path: &Path, ctx: &EvaluationContext) -> Result<Value, ExpressionError> {
  let not_found = || ExpressionError::PathNotFound {
    path: path.to_string(),
  };

  let mut current = ctx.root(&path.root).ok_or_else(not_found)?;

  for segment in &path.segments {
    current = match segment {
      Segment::Field(name) => current.get(name).ok_or_else(not_found)?,
      Segment::Index(index_expr) => {
        let index = evaluate(index_expr, ctx)?;
        match (&index, current) {
          (Value::Number(n), Value::Array(items)) => {
            let idx = n
              .as_u64()
              .ok_or_else(|| type_error("array index must be a non-negative integer".to_string()))?;
            items.get(idx as usize).ok_or_else(not_found)?
          }
          (Value::String(key), Value::Object(map)) => {
            map.get(key.as_str()).ok_or_else(not_found)?
          }
          _ => {
            return Err(type_error(format!(
              "cannot index {} with {}",
              kind(current),
              kind(&index)
            )));
          }
        }
      }
    };
  }

  Ok(current.clone())
}

fn as_bool(value: Value, op: BinaryOp) -> Result<bool, ExpressionError> {
  match value {
    Value::Bool(b) => Ok(b),
    other => {
      let symbol = if op == BinaryOp::And { "&&" } else { "||" };
      Err(type_error(format!("'{symbol}' needs booleans, got {}", kind(&other))))
    }
  }
}

/// Build a JSON number, preferring the integer representation.
fn number(value: f64) -> Value {
  if value.fract() == 0.0 && value.abs() < (i64::MAX as f64) {
    Value::Number(serde_json::Number::from(value as i64))
  } else {
    serde_json::Number::from_f64(value)
      .map(Value::Number)
      .unwrap_or(Value::Null)
  }
}

fn kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

fn type_error(message: String) -> ExpressionError {
  ExpressionError::Type { message }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;
  use serde_json::json;

  fn eval(text: &str, ctx: &EvaluationContext) -> Result<Value, ExpressionError> {
    evaluate(&parse(text).unwrap(), ctx)
  }

  fn make_ctx() -> EvaluationContext {
    EvaluationContext::new(json!({"user": {"email": "a@b.c", "age": 41}}))
      .with_output(json!({"score": 50, "items": ["x", "y"], "result": true}))
      .with_vars(
        [("threshold".to_string(), json!(80))]
          .into_iter()
          .collect(),
      )
      .with_nodes(
        [("fetch".to_string(), json!({"count": 3}))]
          .into_iter()
          .collect(),
      )
  }

  #[test]
  fn resolves_paths_through_all_roots() {
    let ctx = make_ctx();
    assert_eq!(eval("input.user.email", &ctx).unwrap(), json!("a@b.c"));
    assert_eq!(eval("output.items[1]", &ctx).unwrap(), json!("y"));
    assert_eq!(eval("vars.threshold", &ctx).unwrap(), json!(80));
    assert_eq!(eval("env.threshold", &ctx).unwrap(), json!(80));
    assert_eq!(eval("nodes.fetch.count", &ctx).unwrap(), json!(3));
    // Hyphenated or otherwise awkward ids go through index syntax.
    assert_eq!(eval("nodes[\"fetch\"].count", &ctx).unwrap(), json!(3));
  }

  #[test]
  fn missing_path_is_a_distinct_error() {
    let ctx = make_ctx();
    let err = eval("input.user.phone", &ctx).unwrap_err();
    assert!(err.is_path_not_found());

    let err = eval("output.items[9]", &ctx).unwrap_err();
    assert!(err.is_path_not_found());

    let err = eval("mystery.field", &ctx).unwrap_err();
    assert!(err.is_path_not_found());
  }

  #[test]
  fn arithmetic_and_comparison() {
    let ctx = make_ctx();
    assert_eq!(eval("1 + 2 * 3", &ctx).unwrap(), json!(7));
    assert_eq!(eval("output.score / 2", &ctx).unwrap(), json!(25));
    assert_eq!(eval("output.score >= 80", &ctx).unwrap(), json!(false));
    assert_eq!(eval("output.score >= vars.threshold - 40", &ctx).unwrap(), json!(true));
    assert_eq!(eval("10 % 3", &ctx).unwrap(), json!(1));
  }

  #[test]
  fn numeric_equality_crosses_representations() {
    let ctx = make_ctx();
    // 50 stored as integer, 50.0 parsed as float
    assert_eq!(eval("output.score == 50.0", &ctx).unwrap(), json!(true));
  }

  #[test]
  fn boolean_connectives_require_booleans() {
    let ctx = make_ctx();
    assert_eq!(eval("output.result && true", &ctx).unwrap(), json!(true));
    assert_eq!(eval("!output.result || false", &ctx).unwrap(), json!(false));
    assert!(matches!(
      eval("output.score && true", &ctx),
      Err(ExpressionError::Type { .. })
    ));
  }

  #[test]
  fn short_circuit_skips_right_side() {
    let ctx = make_ctx();
    // The right side has a missing path, but it is never evaluated.
    assert_eq!(eval("false && input.nope.nope", &ctx).unwrap(), json!(false));
    assert_eq!(eval("true || input.nope.nope", &ctx).unwrap(), json!(true));
  }

  #[test]
  fn string_concat_and_ordering() {
    let ctx = make_ctx();
    assert_eq!(eval("'ab' + 'cd'", &ctx).unwrap(), json!("abcd"));
    assert_eq!(eval("'abc' < 'abd'", &ctx).unwrap(), json!(true));
  }

  #[test]
  fn division_by_zero_is_an_error() {
    let ctx = make_ctx();
    assert!(matches!(
      eval("1 / 0", &ctx),
      Err(ExpressionError::Type { .. })
    ));
  }
}
