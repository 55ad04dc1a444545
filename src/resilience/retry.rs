//! Retry with exponential backoff and a per-operation circuit breaker.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// Failures before a circuit opens.
const FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit stays open before auto-closing.
const COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Ceiling on the exponential backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct BreakerState {
  failures: u32,
  last_failure: Instant,
  is_open: bool,
}

/// Retry and circuit-breaker state, keyed by operation id.
///
/// Constructed once at startup and passed by handle into everything that
/// needs it, so tests can instantiate isolated instances. A failure is
/// recorded against the breaker only when a whole `retry_with_backoff`
/// call exhausts its retries; at [`FAILURE_THRESHOLD`] recorded failures
/// the circuit opens and further calls for that id fail immediately until
/// the cooldown elapses or a call succeeds.
#[derive(Debug, Default)]
pub struct Resilience {
  breakers: Mutex<HashMap<String, BreakerState>>,
}

impl Resilience {
  pub fn new() -> Self {
    Self {
      breakers: Mutex::new(HashMap::new()),
    }
  }

  /// Run `operation`, retrying on failure with exponential backoff.
  ///
  /// The delay schedule is 1s, 2s, 4s, ... capped at [`MAX_BACKOFF`]. On
  /// success the circuit for `operation_id` resets. When the circuit is
  /// open the triggering error propagates without further attempts; when
  /// retries exhaust, a failure is recorded and the last error propagates.
  pub async fn retry_with_backoff<T, E, F, Fut>(
    &self,
    operation: F,
    max_retries: u32,
    operation_id: &str,
  ) -> std::result::Result<T, E>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
  {
    self
      .retry_with_backoff_if(operation, max_retries, operation_id, |_| true)
      .await
  }

  /// Like [`retry_with_backoff`](Self::retry_with_backoff), but only
  /// errors for which `should_retry` returns true are retried.
  ///
  /// Non-retryable errors (an authorization denial, for instance) still
  /// count as a recorded failure against the circuit.
  pub async fn retry_with_backoff_if<T, E, F, Fut, P>(
    &self,
    operation: F,
    max_retries: u32,
    operation_id: &str,
    should_retry: P,
  ) -> std::result::Result<T, E>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
  {
    let mut attempt = 0u32;

    loop {
      match operation().await {
        Ok(value) => {
          self.reset(operation_id);
          return Ok(value);
        }
        Err(error) => {
          warn!(
            operation = operation_id,
            attempt = attempt + 1,
            max_attempts = max_retries + 1,
            %error,
            "Operation failed"
          );

          if self.is_open(operation_id) || !should_retry(&error) {
            self.record_failure(operation_id);
            return Err(error);
          }

          if attempt < max_retries {
            let delay = backoff_delay(attempt);
            info!(
              operation = operation_id,
              delay_ms = delay.as_millis() as u64,
              "Retrying after backoff"
            );
            sleep(delay).await;
            attempt += 1;
          } else {
            self.record_failure(operation_id);
            return Err(error);
          }
        }
      }
    }
  }

  /// Run `primary`; on any failure, log it and return `fallback`'s result.
  ///
  /// Errors from the fallback itself do propagate.
  pub async fn with_fallback<T, Fut1, Fut2>(
    &self,
    primary: Fut1,
    fallback: Fut2,
    operation_id: &str,
  ) -> Result<T>
  where
    Fut1: Future<Output = Result<T>>,
    Fut2: Future<Output = Result<T>>,
  {
    match primary.await {
      Ok(value) => Ok(value),
      Err(error) => {
        warn!(operation = operation_id, %error, "Primary operation failed, using fallback");
        fallback.await
      }
    }
  }

  /// Whether the circuit for `operation_id` is currently open.
  ///
  /// An open circuit whose cooldown has elapsed auto-closes here.
  pub fn is_open(&self, operation_id: &str) -> bool {
    let mut breakers = match self.breakers.lock() {
      Ok(b) => b,
      Err(poisoned) => poisoned.into_inner(),
    };

    let Some(state) = breakers.get(operation_id) else {
      return false;
    };
    if !state.is_open {
      return false;
    }

    if state.last_failure.elapsed() > COOLDOWN {
      info!(operation = operation_id, "Circuit breaker cooldown elapsed, closing");
      breakers.remove(operation_id);
      return false;
    }

    true
  }

  /// Recorded failure count for `operation_id`.
  pub fn failure_count(&self, operation_id: &str) -> u32 {
    let breakers = match self.breakers.lock() {
      Ok(b) => b,
      Err(poisoned) => poisoned.into_inner(),
    };
    breakers.get(operation_id).map_or(0, |s| s.failures)
  }

  fn record_failure(&self, operation_id: &str) {
    let mut breakers = match self.breakers.lock() {
      Ok(b) => b,
      Err(poisoned) => poisoned.into_inner(),
    };

    let state = breakers
      .entry(operation_id.to_string())
      .or_insert_with(|| BreakerState {
        failures: 0,
        last_failure: Instant::now(),
        is_open: false,
      });

    state.failures += 1;
    state.last_failure = Instant::now();

    if state.failures >= FAILURE_THRESHOLD && !state.is_open {
      state.is_open = true;
      warn!(
        operation = operation_id,
        failures = state.failures,
        "Circuit breaker opened"
      );
    }
  }

  fn reset(&self, operation_id: &str) {
    let mut breakers = match self.breakers.lock() {
      Ok(b) => b,
      Err(poisoned) => poisoned.into_inner(),
    };
    breakers.remove(operation_id);
  }
}

fn backoff_delay(attempt: u32) -> Duration {
  let secs = 1u64 << attempt.min(16);
  Duration::from_secs(secs).min(MAX_BACKOFF)
}
