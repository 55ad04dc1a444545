//! Self-throttling against the GitHub hourly request quota.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// GitHub's authenticated hourly quota.
const HOURLY_QUOTA: usize = 5000;

/// Requests held back from the quota as a safety reserve.
const RESERVE: usize = 100;

/// Minimum spacing between consecutive requests.
const MIN_SPACING: Duration = Duration::from_millis(100);

const WINDOW: Duration = Duration::from_secs(60 * 60);

/// Remaining-quota level below which header observations log a warning.
const LOW_REMAINING: u64 = 100;

/// Rolling-window request pacing.
///
/// Tracks the timestamp of every admitted request over the trailing hour.
/// [`acquire`](Self::acquire) suspends the caller when the window is within
/// the reserve of the hourly quota, or when the last request was less than
/// the minimum spacing ago. This is advisory self-throttling; the
/// provider's own rate-limit headers are inspected separately via
/// [`observe_headers`](Self::observe_headers) and only logged.
///
/// The window lives only in process memory and resets on restart.
pub struct RateLimitGuard {
  window: Mutex<VecDeque<Instant>>,
  budget: usize,
  window_duration: Duration,
  min_spacing: Duration,
}

impl RateLimitGuard {
  pub fn new() -> Self {
    Self::with_limits(HOURLY_QUOTA - RESERVE, WINDOW, MIN_SPACING)
  }

  /// Guard with explicit budget, window, and spacing. Used by tests.
  pub fn with_limits(budget: usize, window_duration: Duration, min_spacing: Duration) -> Self {
    Self {
      window: Mutex::new(VecDeque::with_capacity(budget.min(1024))),
      budget,
      window_duration,
      min_spacing,
    }
  }

  /// Wait until a request may proceed, then record it in the window.
  ///
  /// Prunes timestamps older than the window first. If the window is at
  /// budget, sleeps until the oldest entry exits; independently enforces
  /// the minimum spacing from the most recent entry. The lock is dropped
  /// across every sleep, then the checks rerun from scratch.
  pub async fn acquire(&self) {
    loop {
      let now = Instant::now();
      let mut window = self.window.lock().await;

      let cutoff = now - self.window_duration;
      while window.front().is_some_and(|&t| t < cutoff) {
        window.pop_front();
      }

      if window.len() >= self.budget {
        // front() is non-empty here: budget is at least 1
        let oldest = *window.front().unwrap_or(&now);
        let wait = (oldest + self.window_duration).saturating_duration_since(now);
        drop(window);
        warn!(wait_ms = wait.as_millis() as u64, "Hourly quota reserve reached, waiting");
        sleep(wait).await;
        continue;
      }

      if let Some(&last) = window.back() {
        let gap = now.saturating_duration_since(last);
        if gap < self.min_spacing {
          let wait = self.min_spacing - gap;
          drop(window);
          sleep(wait).await;
          continue;
        }
      }

      window.push_back(now);
      return;
    }
  }

  /// Log the provider's post-request rate-limit headers.
  ///
  /// A persistent 403 is an authorization failure handled elsewhere; it is
  /// never fed back into this guard.
  pub fn observe_headers(&self, remaining: Option<u64>, reset_epoch: Option<u64>) {
    match (remaining, reset_epoch) {
      (Some(remaining), reset) => {
        debug!(remaining, reset = ?reset, "GitHub rate limit headers");
        if remaining < LOW_REMAINING {
          warn!(remaining, "GitHub rate limit running low");
        }
      }
      _ => debug!("Response carried no rate limit headers"),
    }
  }

  /// Number of requests currently tracked in the window.
  pub async fn in_flight_window(&self) -> usize {
    let now = Instant::now();
    let cutoff = now - self.window_duration;
    let window = self.window.lock().await;
    window.iter().filter(|&&t| t >= cutoff).count()
  }
}

impl Default for RateLimitGuard {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for RateLimitGuard {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RateLimitGuard")
      .field("budget", &self.budget)
      .field("window_duration", &self.window_duration)
      .field("min_spacing", &self.min_spacing)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[tokio::test(start_paused = true)]
  async fn enforces_min_spacing() {
    let guard = RateLimitGuard::with_limits(100, Duration::from_secs(3600), MIN_SPACING);

    let start = Instant::now();
    guard.acquire().await;
    guard.acquire().await;
    guard.acquire().await;

    // Two gaps of at least 100ms each
    assert!(start.elapsed() >= Duration::from_millis(200));
  }

  #[tokio::test(start_paused = true)]
  async fn blocks_when_window_full() {
    let guard = Arc::new(RateLimitGuard::with_limits(
      3,
      Duration::from_secs(10),
      Duration::ZERO,
    ));

    for _ in 0..3 {
      guard.acquire().await;
    }
    assert_eq!(guard.in_flight_window().await, 3);

    let start = Instant::now();
    guard.acquire().await;

    // Had to wait for the oldest entry to exit the 10s window
    assert!(start.elapsed() >= Duration::from_secs(9));
  }

  #[tokio::test(start_paused = true)]
  async fn prunes_old_timestamps() {
    let guard = RateLimitGuard::with_limits(2, Duration::from_secs(10), Duration::ZERO);

    guard.acquire().await;
    guard.acquire().await;

    tokio::time::advance(Duration::from_secs(11)).await;

    // Old entries drop out, so this admits without waiting
    let start = Instant::now();
    guard.acquire().await;
    assert!(start.elapsed() < Duration::from_millis(1));
    assert_eq!(guard.in_flight_window().await, 1);
  }
}
