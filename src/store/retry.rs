//! Exponential backoff for provider rate quotas.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RecordStore, Row, RowLocator, StoreError, StoreResult};

/// Retry policy for store operations.
///
/// An operation is attempted at most `max_attempts` times. Before retry `k`
/// (1-based) the policy sleeps `initial_delay * 2^(k-1)`, so the defaults
/// wait 2, 4, 8 and 16 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  max_attempts: u32,
  initial_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      initial_delay: Duration::from_secs(2),
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      initial_delay,
    }
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  /// Delay slept before the given retry (1 = first retry).
  pub fn delay_for(&self, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    self.initial_delay.saturating_mul(factor)
  }

  /// The full backoff schedule between attempts.
  pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
    (1..self.max_attempts).map(|retry| self.delay_for(retry))
  }

  /// Run `call`, retrying quota errors.
  pub async fn run<T, F, Fut>(&self, operation: &str, call: F) -> StoreResult<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
  {
    self.run_if(operation, StoreError::is_quota, call).await
  }

  /// Run `call`, retrying errors for which `retryable` holds.
  ///
  /// Other errors propagate on first sight. Running out of attempts on a
  /// quota error yields `QuotaExhausted`; any other retryable error is
  /// returned as last seen.
  pub async fn run_if<T, F, Fut, P>(&self, operation: &str, retryable: P, mut call: F) -> StoreResult<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
    P: Fn(&StoreError) -> bool,
  {
    let mut attempt = 1;
    loop {
      match call().await {
        Ok(value) => {
          if attempt > 1 {
            debug!(operation, attempt, "succeeded after retry");
          }
          return Ok(value);
        }
        Err(err) if retryable(&err) => {
          if attempt >= self.max_attempts {
            warn!(operation, attempts = attempt, "giving up: {}", err);
            if !err.is_quota() {
              return Err(err);
            }
            return Err(StoreError::QuotaExhausted {
              operation: operation.to_string(),
              attempts: attempt,
            });
          }
          let delay = self.delay_for(attempt);
          warn!(
            operation,
            attempt,
            delay_secs = delay.as_secs(),
            "backing off: {}",
            err
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }
}

/// A store whose every operation goes through a `RetryPolicy`.
pub struct RetryingStore<S> {
  inner: S,
  policy: RetryPolicy,
}

impl<S: RecordStore> RetryingStore<S> {
  pub fn new(inner: S, policy: RetryPolicy) -> Self {
    debug!(
      max_attempts = policy.max_attempts(),
      schedule = ?policy.delays().collect::<Vec<_>>(),
      "store retry policy"
    );
    Self { inner, policy }
  }

  #[cfg(test)]
  pub fn inner(&self) -> &S {
    &self.inner
  }
}

impl<S: RecordStore> RecordStore for RetryingStore<S> {
  async fn read_all(&self, table: &str, fields: &[String]) -> StoreResult<Vec<Row>> {
    self
      .policy
      .run("read_all", || self.inner.read_all(table, fields))
      .await
  }

  async fn read_values(&self, table: &str) -> StoreResult<Vec<Vec<String>>> {
    self
      .policy
      .run("read_values", || self.inner.read_values(table))
      .await
  }

  async fn find_row(&self, table: &str, column: &str, value: &str) -> StoreResult<RowLocator> {
    self
      .policy
      .run("find_row", || self.inner.find_row(table, column, value))
      .await
  }

  async fn write_row(&self, table: &str, locator: RowLocator, values: &[String]) -> StoreResult<()> {
    self
      .policy
      .run("write_row", || self.inner.write_row(table, locator, values))
      .await
  }

  async fn append_row(&self, table: &str, values: &[String]) -> StoreResult<()> {
    self
      .policy
      .run("append_row", || self.inner.append_row(table, values))
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;
  use tokio::time::Instant;

  fn quota() -> StoreError {
    StoreError::Quota {
      message: "429".to_string(),
    }
  }

  #[test]
  fn test_default_schedule() {
    let policy = RetryPolicy::default();
    let delays: Vec<u64> = policy.delays().map(|d| d.as_secs()).collect();
    assert_eq!(delays, vec![2, 4, 8, 16]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_three_quota_errors_then_success() {
    let policy = RetryPolicy::default();
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result = policy
      .run("read_all", || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
          if n < 3 {
            Err(quota())
          } else {
            Ok(42)
          }
        }
      })
      .await;

    assert_eq!(result, Ok(42));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(start.elapsed(), Duration::from_secs(2 + 4 + 8));
  }

  #[tokio::test(start_paused = true)]
  async fn test_exhaustion_after_exactly_max_attempts() {
    let policy = RetryPolicy::default();
    let attempts_at = Mutex::new(Vec::new());
    let start = Instant::now();

    let result: StoreResult<()> = policy
      .run("write_row", || {
        attempts_at.lock().unwrap().push(start.elapsed());
        async { Err(quota()) }
      })
      .await;

    assert_eq!(
      result,
      Err(StoreError::QuotaExhausted {
        operation: "write_row".to_string(),
        attempts: 5,
      })
    );
    let at: Vec<u64> = attempts_at
      .lock()
      .unwrap()
      .iter()
      .map(|d| d.as_secs())
      .collect();
    assert_eq!(at, vec![0, 2, 6, 14, 30]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_other_errors_are_not_retried() {
    let policy = RetryPolicy::default();
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result: StoreResult<()> = policy
      .run("find_row", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(StoreError::Transport("connection reset".to_string())) }
      })
      .await;

    assert!(matches!(result, Err(StoreError::Transport(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
  }

  #[tokio::test(start_paused = true)]
  async fn test_custom_predicate_and_delay() {
    let policy = RetryPolicy::new(3, Duration::from_millis(100));
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result: StoreResult<()> = policy
      .run_if(
        "append_row",
        |e| matches!(e, StoreError::Transport(_)),
        || {
          calls.fetch_add(1, Ordering::SeqCst);
          async { Err(StoreError::Transport("flaky".to_string())) }
        },
      )
      .await;

    // Only quota errors are reported as exhausted quota.
    assert_eq!(result, Err(StoreError::Transport("flaky".to_string())));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(start.elapsed(), Duration::from_millis(300));
  }
}
