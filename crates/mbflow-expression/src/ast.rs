use std::fmt;

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  /// `null`, `true`, `42`, `"text"`.
  Literal(serde_json::Value),
  /// `input.user.email`, `nodes.fetch.items[0]`.
  Path(Path),
  Unary {
    op: UnaryOp,
    operand: Box<Expr>,
  },
  Binary {
    op: BinaryOp,
    left: Box<Expr>,
    right: Box<Expr>,
  },
}

/// A dotted/indexed path rooted at a context name.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
  /// `input`, `output`, `vars`, `env`, or `nodes`.
  pub root: String,
  pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
  /// `.field`
  Field(String),
  /// `[expr]` — numeric index into arrays, string key into maps.
  Index(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  /// `!`
  Not,
  /// `-`
  Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  And,
  Or,
}

impl fmt::Display for Path {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.root)?;
    for segment in &self.segments {
      match segment {
        Segment::Field(name) => write!(f, ".{name}")?,
        Segment::Index(_) => write!(f, "[…]")?,
      }
    }
    Ok(())
  }
}
