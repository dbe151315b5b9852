use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ExpressionError {
  /// The expression text could not be parsed.
  #[error("parse error at offset {offset}: {message}")]
  Parse { message: String, offset: usize },

  /// A path did not resolve against the evaluation context.
  ///
  /// Lenient template resolution turns this into an empty value; strict
  /// resolution and condition evaluation propagate it.
  #[error("path not found: {path}")]
  PathNotFound { path: String },

  /// An operand or result had the wrong type.
  #[error("type error: {message}")]
  Type { message: String },
}

impl ExpressionError {
  pub fn is_path_not_found(&self) -> bool {
    matches!(self, ExpressionError::PathNotFound { .. })
  }
}
