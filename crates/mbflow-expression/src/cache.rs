//! Bounded cache of compiled expressions.
//!
//! Expressions are compiled once and reused across evaluations. The cache is
//! keyed by expression text and shared across threads; at capacity it evicts
//! wholesale rather than tracking recency, which keeps the lock cheap and the
//! bound hard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::ast::Expr;
use crate::error::ExpressionError;
use crate::parser::parse;

/// Counters exposed for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub len: usize,
}

pub(crate) struct ExpressionCache {
  entries: RwLock<HashMap<String, Arc<Expr>>>,
  capacity: usize,
  hits: AtomicU64,
  misses: AtomicU64,
}

impl ExpressionCache {
  pub(crate) fn new(capacity: usize) -> Self {
    Self {
      entries: RwLock::new(HashMap::new()),
      capacity: capacity.max(1),
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
    }
  }

  /// Get the compiled form of an expression, parsing it on first sight.
  pub(crate) fn get_or_compile(&self, text: &str) -> Result<Arc<Expr>, ExpressionError> {
    // Try read lock first
    if let Some(expr) = self.entries.read().unwrap().get(text).cloned() {
      self.hits.fetch_add(1, Ordering::Relaxed);
      return Ok(expr);
    }

    let compiled = Arc::new(parse(text)?);

    // Insert with write lock; another thread may have won the race.
    let mut entries = self.entries.write().unwrap();
    if let Some(existing) = entries.get(text).cloned() {
      self.hits.fetch_add(1, Ordering::Relaxed);
      return Ok(existing);
    }
    self.misses.fetch_add(1, Ordering::Relaxed);
    if entries.len() >= self.capacity {
      trace!(capacity = self.capacity, "expression cache full, evicting");
      entries.clear();
    }
    entries.insert(text.to_string(), compiled.clone());
    trace!(expression = text, "compiled expression");
    Ok(compiled)
  }

  pub(crate) fn stats(&self) -> CacheStats {
    CacheStats {
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      len: self.entries.read().unwrap().len(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_lookup_is_a_hit() {
    let cache = ExpressionCache::new(16);
    let first = cache.get_or_compile("input.a + 1").unwrap();
    let second = cache.get_or_compile("input.a + 1").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
  }

  #[test]
  fn capacity_bounds_the_cache() {
    let cache = ExpressionCache::new(2);
    cache.get_or_compile("1").unwrap();
    cache.get_or_compile("2").unwrap();
    cache.get_or_compile("3").unwrap();

    assert!(cache.stats().len <= 2);
  }

  #[test]
  fn parse_errors_are_not_cached() {
    let cache = ExpressionCache::new(16);
    assert!(cache.get_or_compile("1 +").is_err());
    assert_eq!(cache.stats().len, 0);
  }
}
