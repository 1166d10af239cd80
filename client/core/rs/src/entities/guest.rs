use serde::{Deserialize, Serialize};
use strum::Display;

use super::node::UsageStats;

/// A VM or container on a PVE node.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Guest {
  /// `{instance}-{node}-{vmid}`, see [super::ids::guest_id].
  pub id: String,
  pub vmid: u32,
  pub name: String,
  pub node: String,
  pub instance: String,
  #[serde(rename = "type")]
  pub kind: GuestKind,
  pub status: GuestStatus,
  /// Normalized cpu usage in `[0, 1]`. Zero unless running.
  #[serde(default)]
  pub cpu: f64,
  #[serde(default)]
  pub memory: UsageStats,
  /// Guest filesystem usage. `usage` stays `-1` when the guest agent
  /// is unavailable or the guest is not running.
  #[serde(default)]
  pub disk: UsageStats,
  /// Why disk usage is unavailable, when it is.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub disk_status_reason: Option<String>,
  #[serde(default)]
  pub io: GuestIo,
  #[serde(default)]
  pub uptime_sec: u64,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub os_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub os_version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ip_addresses: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub network_ifaces: Option<Vec<GuestNetworkIface>>,
}

impl Guest {
  /// Non-running guests expose zeroed live metrics and unknown disk
  /// usage, whatever the API returned.
  pub fn zero_if_not_running(mut self) -> Guest {
    if self.status != GuestStatus::Running {
      self.cpu = 0.0;
      self.memory = UsageStats::new(self.memory.total, 0);
      self.disk = UsageStats::unknown();
      self.io = GuestIo::default();
      self.uptime_sec = 0;
    }
    self
  }
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
pub enum GuestKind {
  #[default]
  Qemu,
  Lxc,
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
pub enum GuestStatus {
  Running,
  Stopped,
  Paused,
  #[default]
  Unknown,
}

/// Cumulative io counters in bytes.
#[derive(
  Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq,
)]
pub struct GuestIo {
  pub disk_read: u64,
  pub disk_write: u64,
  pub net_in: u64,
  pub net_out: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GuestNetworkIface {
  pub name: String,
  #[serde(default)]
  pub mac: String,
  #[serde(default)]
  pub addresses: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stopped_guest_is_zeroed() {
    let guest = Guest {
      status: GuestStatus::Stopped,
      cpu: 0.5,
      memory: UsageStats::new(1024, 512),
      disk: UsageStats::new(2048, 1024),
      io: GuestIo {
        disk_read: 1,
        disk_write: 2,
        net_in: 3,
        net_out: 4,
      },
      uptime_sec: 3600,
      ..Default::default()
    }
    .zero_if_not_running();
    assert_eq!(guest.cpu, 0.0);
    assert_eq!(guest.memory.used, 0);
    assert_eq!(guest.disk.usage, -1.0);
    assert_eq!(guest.io, GuestIo::default());
    assert_eq!(guest.uptime_sec, 0);
  }

  #[test]
  fn running_guest_keeps_metrics() {
    let guest = Guest {
      status: GuestStatus::Running,
      cpu: 0.5,
      uptime_sec: 3600,
      ..Default::default()
    }
    .zero_if_not_running();
    assert_eq!(guest.cpu, 0.5);
    assert_eq!(guest.uptime_sec, 3600);
  }
}
