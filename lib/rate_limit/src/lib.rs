//! Failure-based rate limiting for authentication paths.
//!
//! Clock-injected like the repo's other timed subsystems: callers
//! pass the current timestamp in milliseconds, so behavior is fully
//! deterministic under test. Only failed attempts count against the
//! limit; succeeding clients behind a shared NAT never throttle each
//! other.

use std::{
  collections::{HashMap, VecDeque},
  net::IpAddr,
  sync::Mutex,
};

/// Keys whose latest failure is older than this are dropped during
/// the periodic sweep.
const STALE_AFTER_MS: i64 = 15 * 60 * 1000;

/// The whole map is swept at most this often, piggybacked on
/// `check` calls instead of a background task.
const SWEEP_INTERVAL_MS: i64 = 60 * 1000;

pub struct RateLimiter {
  disabled: bool,
  max_attempts: usize,
  window_ms: i64,
  inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
  /// Failure timestamps per source, oldest first.
  attempts: HashMap<IpAddr, VecDeque<i64>>,
  last_sweep: i64,
}

impl RateLimiter {
  pub fn new(
    disabled: bool,
    max_attempts: usize,
    window_seconds: u64,
  ) -> RateLimiter {
    RateLimiter {
      disabled,
      max_attempts,
      window_ms: (window_seconds * 1000) as i64,
      inner: Mutex::new(Inner::default()),
    }
  }

  /// Whether a new attempt from `ip` may proceed at `now`. Denials
  /// return the milliseconds until the oldest counted failure ages
  /// out of the window.
  pub fn check(&self, ip: IpAddr, now: i64) -> Result<(), i64> {
    if self.disabled {
      return Ok(());
    }
    let mut inner = self.inner.lock().unwrap();
    if now - inner.last_sweep >= SWEEP_INTERVAL_MS {
      inner.last_sweep = now;
      inner.attempts.retain(|_, log| {
        log.back().is_some_and(|&last| now - last < STALE_AFTER_MS)
      });
    }
    let Some(log) = inner.attempts.get_mut(&ip) else {
      return Ok(());
    };
    let window_start = now - self.window_ms;
    while log.front().is_some_and(|&t| t <= window_start) {
      log.pop_front();
    }
    if log.len() >= self.max_attempts {
      let retry_in = log
        .front()
        .map(|&oldest| oldest + self.window_ms - now)
        .unwrap_or(self.window_ms);
      Err(retry_in.max(0))
    } else {
      Ok(())
    }
  }

  /// Record a failed attempt. Succeeding attempts are never
  /// recorded.
  pub fn record_failure(&self, ip: IpAddr, now: i64) {
    if self.disabled {
      return;
    }
    let mut inner = self.inner.lock().unwrap();
    let log = inner.attempts.entry(ip).or_default();
    let window_start = now - self.window_ms;
    while log.front().is_some_and(|&t| t <= window_start) {
      log.pop_front();
    }
    log.push_back(now);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ip(last: u8) -> IpAddr {
    IpAddr::from([10, 0, 0, last])
  }

  #[test]
  fn failures_beyond_max_deny_until_window_passes() {
    let limiter = RateLimiter::new(false, 3, 60);
    for t in [0, 1_000, 2_000] {
      assert!(limiter.check(ip(1), t).is_ok());
      limiter.record_failure(ip(1), t);
    }
    // Third failure at t=2s fills the window.
    let retry = limiter.check(ip(1), 3_000).unwrap_err();
    // The failure at t=0 ages out at t=60s.
    assert_eq!(retry, 57_000);
    assert!(limiter.check(ip(1), 59_999).is_err());
    assert!(limiter.check(ip(1), 60_001).is_ok());
  }

  #[test]
  fn sources_are_tracked_independently() {
    let limiter = RateLimiter::new(false, 1, 60);
    limiter.record_failure(ip(1), 0);
    assert!(limiter.check(ip(1), 1_000).is_err());
    assert!(limiter.check(ip(2), 1_000).is_ok());
  }

  #[test]
  fn successes_never_count() {
    let limiter = RateLimiter::new(false, 2, 60);
    // A hundred checks without recorded failures stay open.
    for t in 0..100 {
      assert!(limiter.check(ip(1), t * 500).is_ok());
    }
  }

  #[test]
  fn disabled_limiter_always_allows() {
    let limiter = RateLimiter::new(true, 1, 60);
    limiter.record_failure(ip(1), 0);
    limiter.record_failure(ip(1), 1);
    assert!(limiter.check(ip(1), 2).is_ok());
  }

  #[test]
  fn sweep_clears_idle_sources() {
    let limiter = RateLimiter::new(false, 1, 60);
    limiter.record_failure(ip(1), 0);
    // Well past staleness; the next check sweeps the idle entry
    // before consulting it.
    assert!(limiter.check(ip(1), STALE_AFTER_MS + 1).is_ok());
    assert!(
      limiter.inner.lock().unwrap().attempts.is_empty()
    );
  }
}
