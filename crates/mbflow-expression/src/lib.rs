//! MBFlow Expression
//!
//! A small expression language over JSON values, used in two places:
//!
//! - **Templates**: node configs may embed `{{ … }}` expressions. A string
//!   that is exactly one expression resolves to the native JSON value of the
//!   lookup; expressions inside a larger string are interpolated as text.
//! - **Edge conditions**: boolean expressions evaluated against a source
//!   node's output to decide whether an edge passes.
//!
//! Expressions support literals, dotted/indexed paths against the evaluation
//! context roots (`input`, `output`, `vars`, `env`, `nodes`), arithmetic,
//! comparison, and boolean connectives:
//!
//! ```text
//! {{ input.user.email }}
//! {{ nodes.fetch.items[0].name }}
//! output.score >= 80 && vars.threshold != null
//! ```
//!
//! Compilation is separate from evaluation: [`ExpressionEngine`] parses an
//! expression once, caches the AST keyed by its text, and evaluates the
//! cached program against per-node contexts.

mod ast;
mod cache;
mod context;
mod engine;
mod error;
mod eval;
mod parser;
mod template;

pub use ast::{BinaryOp, Expr, Path, Segment, UnaryOp};
pub use cache::CacheStats;
pub use context::EvaluationContext;
pub use engine::ExpressionEngine;
pub use error::ExpressionError;
pub use eval::evaluate;
pub use parser::parse;
pub use template::{TemplateMode, render_value};
