//! Adaptive per instance polling intervals.
//!
//! A pure function of its inputs, so scheduling decisions are
//! testable without any clock or task machinery.

use std::time::Duration;

/// PVE polls a fixed fast cadence; `/cluster/resources` itself only
/// refreshes about every 10 seconds server side.
pub const PVE_BASE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerInputs {
  pub base: Duration,
  pub adaptive_enabled: bool,
  /// `retry_at - now` while the breaker is open.
  pub breaker_open_for: Option<Duration>,
  /// Consecutive polls with an unchanged payload hash.
  pub stable_polls: u32,
  /// Normalized staleness score in `[0, 1]`.
  pub staleness: f64,
  pub min: Duration,
  pub max: Duration,
}

/// Staleness above this means freshness is eroding and polling
/// should speed back up.
const STALENESS_SPEEDUP: f64 = 0.75;

/// Growth per stable poll while nothing changes.
const STABLE_GROWTH: f64 = 1.5;

pub fn effective_interval(inputs: SchedulerInputs) -> Duration {
  if !inputs.adaptive_enabled {
    return inputs.base;
  }
  if let Some(open_for) = inputs.breaker_open_for {
    return open_for.max(inputs.min);
  }
  let mut interval = inputs.base.as_secs_f64();
  let max = inputs.max.as_secs_f64();
  let min = inputs.min.as_secs_f64();
  if inputs.stable_polls > 0 {
    // Bounded exponent: the cap is reached long before 32 polls.
    let growth =
      STABLE_GROWTH.powi(inputs.stable_polls.min(32) as i32);
    interval = (interval * growth).min(max);
  }
  if inputs.staleness > STALENESS_SPEEDUP {
    interval = (interval / 2.0).max(min);
  }
  Duration::from_secs_f64(interval.clamp(min, max))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn inputs() -> SchedulerInputs {
    SchedulerInputs {
      base: Duration::from_secs(60),
      adaptive_enabled: true,
      breaker_open_for: None,
      stable_polls: 0,
      staleness: 0.0,
      min: Duration::from_secs(10),
      max: Duration::from_secs(300),
    }
  }

  #[test]
  fn disabled_always_returns_base() {
    for stable_polls in [0, 3, 50] {
      for staleness in [0.0, 0.5, 1.0] {
        let interval = effective_interval(SchedulerInputs {
          adaptive_enabled: false,
          stable_polls,
          staleness,
          breaker_open_for: Some(Duration::from_secs(120)),
          ..inputs()
        });
        assert_eq!(interval, Duration::from_secs(60));
      }
    }
  }

  #[test]
  fn open_breaker_defers_to_retry_time() {
    let interval = effective_interval(SchedulerInputs {
      breaker_open_for: Some(Duration::from_secs(42)),
      ..inputs()
    });
    assert_eq!(interval, Duration::from_secs(42));
    // Floored at min.
    let interval = effective_interval(SchedulerInputs {
      breaker_open_for: Some(Duration::from_secs(1)),
      ..inputs()
    });
    assert_eq!(interval, Duration::from_secs(10));
  }

  #[test]
  fn stable_polls_grow_interval_to_cap() {
    let one = effective_interval(SchedulerInputs {
      stable_polls: 1,
      ..inputs()
    });
    assert_eq!(one, Duration::from_secs(90));
    let capped = effective_interval(SchedulerInputs {
      stable_polls: 10,
      ..inputs()
    });
    assert_eq!(capped, Duration::from_secs(300));
  }

  #[test]
  fn eroding_freshness_speeds_polling_up() {
    let interval = effective_interval(SchedulerInputs {
      staleness: 0.8,
      ..inputs()
    });
    assert_eq!(interval, Duration::from_secs(30));
    // Speedup applies after growth.
    let interval = effective_interval(SchedulerInputs {
      stable_polls: 10,
      staleness: 0.8,
      ..inputs()
    });
    assert_eq!(interval, Duration::from_secs(150));
  }

  #[test]
  fn result_is_always_clamped() {
    let interval = effective_interval(SchedulerInputs {
      base: Duration::from_secs(1),
      ..inputs()
    });
    assert_eq!(interval, Duration::from_secs(10));
    let interval = effective_interval(SchedulerInputs {
      base: Duration::from_secs(10_000),
      ..inputs()
    });
    assert_eq!(interval, Duration::from_secs(300));
  }
}
