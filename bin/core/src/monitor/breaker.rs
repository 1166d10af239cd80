//! Per instance circuit breaker.
//!
//! Clock-injected: every method takes `now` in milliseconds, so the
//! transitions are fully deterministic under test.

use std::sync::Mutex;

use serde::Serialize;
use strum::Display;

#[derive(Debug, Clone, Copy)]
pub struct BreakerParams {
  /// Consecutive failures before the circuit opens.
  pub open_threshold: u32,
  pub retry_interval_ms: i64,
  pub max_delay_ms: i64,
  pub half_open_window_ms: i64,
}

impl Default for BreakerParams {
  fn default() -> Self {
    BreakerParams {
      open_threshold: 3,
      retry_interval_ms: 5_000,
      max_delay_ms: 5 * 60 * 1000,
      half_open_window_ms: 30_000,
    }
  }
}

#[derive(
  Serialize, Debug, Display, Clone, Copy, PartialEq, Eq, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BreakerState {
  #[default]
  Closed,
  Open,
  HalfOpen,
}

#[derive(Serialize, Debug, Clone, Copy, Default)]
pub struct BreakerStatus {
  pub state: BreakerState,
  pub failures: u32,
  /// When calls will next be allowed. 0 while closed.
  pub retry_at: i64,
}

#[derive(Default)]
struct BreakerInner {
  state: BreakerState,
  failures: u32,
  retry_at: i64,
  last_probe: i64,
}

#[derive(Default)]
pub struct CircuitBreaker {
  params: BreakerParams,
  inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
  pub fn new(params: BreakerParams) -> CircuitBreaker {
    CircuitBreaker { params, inner: Mutex::new(Default::default()) }
  }

  /// Whether a call may proceed at `now`. Reaching the retry time
  /// moves an open breaker to half-open and admits the caller as the
  /// probe; in half-open, one probe is admitted per window.
  pub fn allow(&self, now: i64) -> bool {
    let mut inner = self.inner.lock().unwrap();
    match inner.state {
      BreakerState::Closed => true,
      BreakerState::Open => {
        if now >= inner.retry_at {
          inner.state = BreakerState::HalfOpen;
          inner.last_probe = now;
          true
        } else {
          false
        }
      }
      BreakerState::HalfOpen => {
        if now - inner.last_probe >= self.params.half_open_window_ms {
          inner.last_probe = now;
          true
        } else {
          false
        }
      }
    }
  }

  pub fn on_success(&self) {
    let mut inner = self.inner.lock().unwrap();
    inner.state = BreakerState::Closed;
    inner.failures = 0;
    inner.retry_at = 0;
  }

  pub fn on_failure(&self, now: i64) {
    let mut inner = self.inner.lock().unwrap();
    // Shift before increment: the first opening uses
    // retry_interval << (threshold - 1), each probe failure doubles.
    let shift = inner.failures.min(16);
    let delay = (self.params.retry_interval_ms << shift)
      .min(self.params.max_delay_ms);
    inner.failures += 1;
    match inner.state {
      BreakerState::Closed => {
        if inner.failures >= self.params.open_threshold {
          inner.state = BreakerState::Open;
          inner.retry_at = now + delay;
        }
      }
      BreakerState::HalfOpen | BreakerState::Open => {
        inner.state = BreakerState::Open;
        inner.retry_at = now + delay;
      }
    }
  }

  pub fn status(&self) -> BreakerStatus {
    let inner = self.inner.lock().unwrap();
    BreakerStatus {
      state: inner.state,
      failures: inner.failures,
      retry_at: inner.retry_at,
    }
  }
}
