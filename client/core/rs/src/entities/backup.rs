use serde::{Deserialize, Serialize};
use strum::Display;

/// A guest (or host config) backup, from PVE storage or a PBS
/// datastore. Host config backups (vmid 0) are canonically PBS items.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Backup {
  pub id: String,
  pub instance: String,
  /// PBS datastore or PVE storage holding the archive.
  pub datastore: String,
  /// 0 for host config backups.
  pub vmid: u32,
  #[serde(rename = "type")]
  pub kind: BackupKind,
  /// Unix seconds of the backup timestamp.
  pub time: i64,
  /// Archive size in bytes.
  #[serde(default)]
  pub size: u64,
  #[serde(default)]
  pub protected: bool,
  #[serde(default)]
  pub verified: bool,
  /// Verification outcome, eg. `ok` / `failed`, when the datastore
  /// runs verify jobs.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub verification: Option<String>,
  /// PBS namespace, when not the root namespace.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub namespace: Option<String>,
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
pub enum BackupKind {
  #[default]
  Vm,
  Ct,
  Host,
}

/// A guest snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
  pub id: String,
  pub vmid: u32,
  pub node: String,
  pub instance: String,
  /// Unix seconds of snapshot creation.
  pub time: i64,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent: Option<String>,
  /// Whether RAM state was included.
  #[serde(default)]
  pub vm_state: bool,
  /// Size in bytes when the storage reports it.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub size_bytes: Option<u64>,
}
