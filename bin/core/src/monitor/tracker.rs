//! Per instance freshness tracking.

use std::{collections::HashMap, sync::Mutex};

use serde::Serialize;
use sha2::{Digest, Sha256};
use vigil_client::entities::InstanceKind;

#[derive(Debug, Clone, Copy)]
pub struct StalenessBounds {
  /// Age at which data starts counting as stale (ms).
  pub min_stale_ms: i64,
  /// Age at which data is fully stale (ms).
  pub max_stale_ms: i64,
}

impl Default for StalenessBounds {
  fn default() -> Self {
    StalenessBounds {
      min_stale_ms: 10_000,
      max_stale_ms: 5 * 60 * 1000,
    }
  }
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct TrackerEntry {
  /// Last successful poll (ms), 0 when never.
  pub last_success: i64,
  /// Last failed poll (ms), 0 when never.
  pub last_error: i64,
  pub last_error_message: Option<String>,
  /// Digest of the last payload, for change detection.
  pub change_hash: Option<String>,
  /// Consecutive polls whose payload hash did not change.
  pub stable_polls: u32,
}

/// Tracks `{last_success, last_error, change_hash}` per
/// (kind, instance) and derives the normalized staleness score the
/// adaptive scheduler consumes.
#[derive(Default)]
pub struct StalenessTracker {
  bounds: StalenessBounds,
  entries: Mutex<HashMap<String, TrackerEntry>>,
}

fn entry_key(kind: InstanceKind, instance: &str) -> String {
  format!("{kind}:{instance}")
}

impl StalenessTracker {
  pub fn new(bounds: StalenessBounds) -> StalenessTracker {
    StalenessTracker { bounds, entries: Mutex::new(HashMap::new()) }
  }

  pub fn record_success(
    &self,
    kind: InstanceKind,
    instance: &str,
    now: i64,
    change_hash: String,
  ) {
    let mut entries = self.entries.lock().unwrap();
    let entry =
      entries.entry(entry_key(kind, instance)).or_default();
    entry.last_success = now;
    if entry.change_hash.as_deref() == Some(change_hash.as_str()) {
      entry.stable_polls += 1;
    } else {
      entry.stable_polls = 0;
      entry.change_hash = Some(change_hash);
    }
  }

  pub fn record_error(
    &self,
    kind: InstanceKind,
    instance: &str,
    now: i64,
    message: String,
  ) {
    let mut entries = self.entries.lock().unwrap();
    let entry =
      entries.entry(entry_key(kind, instance)).or_default();
    entry.last_error = now;
    entry.last_error_message = Some(message);
  }

  pub fn entry(
    &self,
    kind: InstanceKind,
    instance: &str,
  ) -> TrackerEntry {
    self
      .entries
      .lock()
      .unwrap()
      .get(&entry_key(kind, instance))
      .cloned()
      .unwrap_or_default()
  }

  pub fn remove(&self, kind: InstanceKind, instance: &str) {
    self.entries.lock().unwrap().remove(&entry_key(kind, instance));
  }

  /// Normalized staleness in `[0, 1]`:
  /// `(age - min_stale) / (max_stale - min_stale)` clamped, and 1
  /// when the instance never succeeded.
  pub fn score(
    &self,
    kind: InstanceKind,
    instance: &str,
    now: i64,
  ) -> f64 {
    let entry = self.entry(kind, instance);
    if entry.last_success == 0 {
      return 1.0;
    }
    let age = (now - entry.last_success) as f64;
    let min = self.bounds.min_stale_ms as f64;
    let max = self.bounds.max_stale_ms as f64;
    ((age - min) / (max - min)).clamp(0.0, 1.0)
  }
}

/// Stable digest of a payload's canonical serialization. Callers
/// sort their collections before hashing so identical worlds hash
/// identically.
pub fn change_hash(payload: &impl Serialize) -> String {
  let bytes = serde_json::to_vec(payload).unwrap_or_default();
  hex::encode(Sha256::digest(&bytes))
}

#[cfg(test)]
mod tests {
  use super::*;

  const KIND: InstanceKind = InstanceKind::Pve;

  #[test]
  fn score_is_one_before_first_success() {
    let tracker = StalenessTracker::default();
    assert_eq!(tracker.score(KIND, "pve1", 50_000), 1.0);
  }

  #[test]
  fn score_ramps_between_bounds() {
    let tracker = StalenessTracker::default();
    tracker.record_success(KIND, "pve1", 0, "h".into());
    // Inside min_stale: fresh.
    assert_eq!(tracker.score(KIND, "pve1", 5_000), 0.0);
    // Halfway between 10s and 300s.
    let mid = tracker.score(KIND, "pve1", 155_000);
    assert!((mid - 0.5).abs() < 1e-9);
    // Past max_stale: fully stale.
    assert_eq!(tracker.score(KIND, "pve1", 400_000), 1.0);
  }

  #[test]
  fn score_monotonically_non_decreasing_between_successes() {
    let tracker = StalenessTracker::default();
    tracker.record_success(KIND, "pve1", 0, "h".into());
    let mut last = 0.0;
    for now in (0..400_000).step_by(10_000) {
      let score = tracker.score(KIND, "pve1", now);
      assert!(score >= last);
      last = score;
    }
  }

  #[test]
  fn stable_polls_count_unchanged_hashes() {
    let tracker = StalenessTracker::default();
    tracker.record_success(KIND, "pve1", 0, "a".into());
    assert_eq!(tracker.entry(KIND, "pve1").stable_polls, 0);
    tracker.record_success(KIND, "pve1", 1, "a".into());
    tracker.record_success(KIND, "pve1", 2, "a".into());
    assert_eq!(tracker.entry(KIND, "pve1").stable_polls, 2);
    tracker.record_success(KIND, "pve1", 3, "b".into());
    assert_eq!(tracker.entry(KIND, "pve1").stable_polls, 0);
  }

  #[test]
  fn change_hash_is_stable_for_equal_payloads() {
    let a = vec![("id-1", 1.0), ("id-2", 2.0)];
    let b = vec![("id-1", 1.0), ("id-2", 2.0)];
    assert_eq!(change_hash(&a), change_hash(&b));
    let c = vec![("id-1", 1.5), ("id-2", 2.0)];
    assert_ne!(change_hash(&a), change_hash(&c));
  }
}
