use serde::{Deserialize, Serialize};
use strum::Display;

/// A Proxmox host, as projected from the most recent successful poll.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Node {
  /// `{instance}-{name}`, see [super::ids::node_id].
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub display_name: String,
  pub instance: String,
  pub status: NodeStatus,
  /// Normalized cpu usage in `[0, 1]`.
  #[serde(default)]
  pub cpu: f64,
  #[serde(default)]
  pub memory: UsageStats,
  #[serde(default)]
  pub disk: UsageStats,
  #[serde(default)]
  pub uptime_sec: u64,
  /// 1 / 5 / 15 minute load averages.
  #[serde(default)]
  pub load_avg: [f64; 3],
  /// Package temperature in °C where the host exposes sensors.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub temperature: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cluster_name: Option<String>,
  #[serde(default)]
  pub is_cluster_member: bool,
}

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Display,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeStatus {
  Online,
  #[default]
  Offline,
}

/// Total / used / free in bytes with a percent usage.
/// `usage = -1` marks the percentage unknown.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct UsageStats {
  pub total: u64,
  pub used: u64,
  pub free: u64,
  /// Percent in `[0, 100]`, or `-1` when unknown.
  pub usage: f64,
}

impl Default for UsageStats {
  fn default() -> Self {
    UsageStats { total: 0, used: 0, free: 0, usage: -1.0 }
  }
}

impl UsageStats {
  /// `free` is always derived so `used + free == total` holds.
  pub fn new(total: u64, used: u64) -> UsageStats {
    let used = used.min(total);
    let usage = if total == 0 {
      -1.0
    } else {
      100.0 * used as f64 / total as f64
    };
    UsageStats { total, used, free: total - used, usage }
  }

  pub fn unknown() -> UsageStats {
    UsageStats::default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn usage_stats_derives_free_and_percent() {
    let stats = UsageStats::new(1000, 250);
    assert_eq!(stats.free, 750);
    assert_eq!(stats.used + stats.free, stats.total);
    assert!((stats.usage - 25.0).abs() < f64::EPSILON);
  }

  #[test]
  fn zero_total_marks_usage_unknown() {
    let stats = UsageStats::new(0, 0);
    assert_eq!(stats.usage, -1.0);
  }

  #[test]
  fn used_is_clamped_to_total() {
    let stats = UsageStats::new(100, 150);
    assert_eq!(stats.used, 100);
    assert_eq!(stats.free, 0);
  }
}
