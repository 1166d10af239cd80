use serde::{Deserialize, Serialize};

/// Summary of a Proxmox Mail Gateway instance.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PmgSummary {
  pub instance: String,
  #[serde(default)]
  pub version: String,
  #[serde(default)]
  pub uptime_sec: u64,
  #[serde(default)]
  pub mail: PmgMailStats,
  #[serde(default)]
  pub queues: PmgQueueStatus,
  #[serde(default)]
  pub quarantine: PmgQuarantine,
  #[serde(default)]
  pub domains: Vec<PmgDomainStats>,
}

/// Mail counters over the last stats window.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PmgMailStats {
  #[serde(default)]
  pub count_in: u64,
  #[serde(default)]
  pub count_out: u64,
  #[serde(default)]
  pub spam_in: u64,
  #[serde(default)]
  pub virus_in: u64,
  #[serde(default)]
  pub bounces_in: u64,
  #[serde(default)]
  pub bounces_out: u64,
  /// Average processing time in seconds.
  #[serde(default)]
  pub avg_process_time: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PmgQueueStatus {
  /// Messages waiting in the postfix deferred queue.
  #[serde(default)]
  pub deferred: u64,
  #[serde(default)]
  pub active: u64,
  #[serde(default)]
  pub hold: u64,
  /// Age of the oldest queued message in seconds.
  #[serde(default)]
  pub oldest_age_sec: u64,
}

impl PmgQueueStatus {
  pub fn total(&self) -> u64 {
    self.deferred + self.active + self.hold
  }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PmgQuarantine {
  #[serde(default)]
  pub spam: u64,
  #[serde(default)]
  pub virus: u64,
  #[serde(default)]
  pub attachment: u64,
  #[serde(default)]
  pub blacklisted: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PmgDomainStats {
  pub domain: String,
  #[serde(default)]
  pub count_in: u64,
  #[serde(default)]
  pub count_out: u64,
  #[serde(default)]
  pub spam_in: u64,
}
