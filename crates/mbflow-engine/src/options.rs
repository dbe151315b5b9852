//! Execution tuning knobs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked before each retry sleep with `(node_id, attempt)`.
pub type OnRetry = Arc<dyn Fn(&str, u32) + Send + Sync>;

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryBackoff {
  /// Every retry waits `initial_delay`.
  Constant,
  /// Retry `k` waits `initial_delay × k`, capped at `max_delay`.
  Linear,
  /// Retry `k` waits `initial_delay × 2^(k−1)`, capped at `max_delay`.
  #[default]
  Exponential,
}

/// Retry behaviour for failed node invocations.
#[derive(Clone)]
pub struct RetryPolicy {
  /// Total attempts including the first. 1 disables retries.
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub max_delay: Duration,
  pub backoff: RetryBackoff,
  /// Substrings an error message must contain to be retryable.
  /// Empty means every (retry-eligible) error is retryable.
  pub retryable_errors: Vec<String>,
  /// Observer hook, called before each retry sleep.
  pub on_retry: Option<OnRetry>,
}

impl RetryPolicy {
  pub fn new(max_attempts: u32) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      ..Self::default()
    }
  }

  pub fn with_initial_delay(mut self, delay: Duration) -> Self {
    self.initial_delay = delay;
    self
  }

  pub fn with_max_delay(mut self, delay: Duration) -> Self {
    self.max_delay = delay;
    self
  }

  pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
    self.backoff = backoff;
    self
  }

  pub fn with_retryable_errors(mut self, substrings: Vec<String>) -> Self {
    self.retryable_errors = substrings;
    self
  }

  pub fn with_on_retry(mut self, callback: OnRetry) -> Self {
    self.on_retry = Some(callback);
    self
  }

  /// Delay before retry `attempt` (1-based).
  pub fn delay(&self, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let delay = match self.backoff {
      RetryBackoff::Constant => self.initial_delay,
      RetryBackoff::Linear => self.initial_delay.saturating_mul(attempt),
      RetryBackoff::Exponential => self
        .initial_delay
        .saturating_mul(2u32.saturating_pow(attempt - 1)),
    };
    delay.min(self.max_delay)
  }

  /// Whether an error message matches the retryable set.
  pub fn is_retryable(&self, message: &str) -> bool {
    self.retryable_errors.is_empty()
      || self.retryable_errors.iter().any(|s| message.contains(s))
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 1,
      initial_delay: Duration::from_millis(100),
      max_delay: Duration::from_secs(30),
      backoff: RetryBackoff::Exponential,
      retryable_errors: Vec::new(),
      on_retry: None,
    }
  }
}

impl fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryPolicy")
      .field("max_attempts", &self.max_attempts)
      .field("initial_delay", &self.initial_delay)
      .field("max_delay", &self.max_delay)
      .field("backoff", &self.backoff)
      .field("retryable_errors", &self.retryable_errors)
      .field("on_retry", &self.on_retry.as_ref().map(|_| "…"))
      .finish()
  }
}

/// Tuning knobs for one execution.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
  /// Fail node dispatch when a template path does not resolve.
  pub strict_templates: bool,
  /// Concurrent node dispatches per wave. 0 means unlimited.
  pub max_parallelism: usize,
  /// Execution-wide deadline.
  pub timeout: Option<Duration>,
  /// Default per-node deadline; `config.timeout` caps it further.
  pub node_timeout: Option<Duration>,
  pub retry: RetryPolicy,
  /// Keep starting later waves after a node failure, returning an
  /// aggregate error at the end.
  pub continue_on_error: bool,
  /// Per-output size limit in bytes.
  pub max_output_size: Option<u64>,
  /// Cumulative output size limit in bytes.
  pub max_total_memory: Option<u64>,
  /// Drop outputs from state once no pending node can need them.
  pub memory_opts: bool,
  /// Write a checkpoint at every wave boundary.
  pub checkpoints: bool,
}

impl ExecutionOptions {
  pub fn with_strict_templates(mut self, strict: bool) -> Self {
    self.strict_templates = strict;
    self
  }

  pub fn with_max_parallelism(mut self, limit: usize) -> Self {
    self.max_parallelism = limit;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
    self.node_timeout = Some(timeout);
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
    self.continue_on_error = continue_on_error;
    self
  }

  pub fn with_max_output_size(mut self, bytes: u64) -> Self {
    self.max_output_size = Some(bytes);
    self
  }

  pub fn with_max_total_memory(mut self, bytes: u64) -> Self {
    self.max_total_memory = Some(bytes);
    self
  }

  pub fn with_memory_opts(mut self, enabled: bool) -> Self {
    self.memory_opts = enabled;
    self
  }

  pub fn with_checkpoints(mut self, enabled: bool) -> Self {
    self.checkpoints = enabled;
    self
  }
}

impl Default for ExecutionOptions {
  fn default() -> Self {
    Self {
      strict_templates: false,
      max_parallelism: 0,
      timeout: None,
      node_timeout: None,
      retry: RetryPolicy::default(),
      continue_on_error: false,
      max_output_size: None,
      max_total_memory: None,
      memory_opts: false,
      checkpoints: false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn constant_backoff_ignores_attempt_number() {
    let policy = RetryPolicy::new(5)
      .with_initial_delay(Duration::from_millis(10))
      .with_backoff(RetryBackoff::Constant);

    assert_eq!(policy.delay(1), Duration::from_millis(10));
    assert_eq!(policy.delay(4), Duration::from_millis(10));
  }

  #[test]
  fn linear_backoff_scales_and_caps() {
    let policy = RetryPolicy::new(10)
      .with_initial_delay(Duration::from_millis(100))
      .with_max_delay(Duration::from_millis(250))
      .with_backoff(RetryBackoff::Linear);

    assert_eq!(policy.delay(1), Duration::from_millis(100));
    assert_eq!(policy.delay(2), Duration::from_millis(200));
    assert_eq!(policy.delay(3), Duration::from_millis(250));
  }

  #[test]
  fn exponential_backoff_doubles_and_caps() {
    let policy = RetryPolicy::new(10)
      .with_initial_delay(Duration::from_millis(100))
      .with_max_delay(Duration::from_millis(500))
      .with_backoff(RetryBackoff::Exponential);

    assert_eq!(policy.delay(1), Duration::from_millis(100));
    assert_eq!(policy.delay(2), Duration::from_millis(200));
    assert_eq!(policy.delay(3), Duration::from_millis(400));
    assert_eq!(policy.delay(4), Duration::from_millis(500));
  }

  #[test]
  fn empty_retryable_set_matches_everything() {
    let policy = RetryPolicy::new(3);
    assert!(policy.is_retryable("anything at all"));

    let policy = policy.with_retryable_errors(vec!["temporary".to_string()]);
    assert!(policy.is_retryable("a temporary glitch"));
    assert!(!policy.is_retryable("permanent failure"));
  }
}
