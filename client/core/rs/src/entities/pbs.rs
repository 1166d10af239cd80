use serde::{Deserialize, Serialize};
use strum::Display;

/// Summary of a Proxmox Backup Server instance.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PbsSummary {
  pub instance: String,
  #[serde(default)]
  pub version: String,
  #[serde(default)]
  pub cpu: f64,
  #[serde(default)]
  pub memory_total: u64,
  #[serde(default)]
  pub memory_used: u64,
  #[serde(default)]
  pub uptime_sec: u64,
  #[serde(default)]
  pub datastores: Vec<PbsDatastore>,
  #[serde(default)]
  pub jobs: Vec<PbsJob>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PbsDatastore {
  pub name: String,
  pub total: u64,
  pub used: u64,
  pub free: u64,
  /// Percent in `[0, 100]`, `-1` when unknown.
  pub usage: f64,
  /// Estimated seconds until full, when PBS reports one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub estimated_full_sec: Option<i64>,
  /// Garbage collection status line, when available.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gc_status: Option<String>,
}

/// A verify / sync / prune / garbage collection job with its last
/// run outcome.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PbsJob {
  pub id: String,
  pub kind: PbsJobKind,
  #[serde(default)]
  pub datastore: String,
  /// Unix seconds of the last run, 0 when never ran.
  #[serde(default)]
  pub last_run: i64,
  #[serde(default)]
  pub last_run_ok: bool,
  /// Upstream status string, eg. `OK` or the error line.
  #[serde(default)]
  pub last_run_status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_run: Option<i64>,
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
pub enum PbsJobKind {
  #[default]
  Verify,
  Sync,
  Prune,
  GarbageCollection,
}
