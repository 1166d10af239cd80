//! Proxmox Backup Server operations.

use serde::Deserialize;

use crate::{
  ProxmoxClient,
  error::Result,
  wire::{bool_from_int, f64_flexible, u64_flexible},
};

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PbsNodeStatus {
  #[serde(default, deserialize_with = "f64_flexible")]
  pub cpu: f64,
  #[serde(default)]
  pub memory: PbsMemory,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub uptime: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PbsMemory {
  #[serde(default, deserialize_with = "u64_flexible")]
  pub total: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub used: u64,
}

/// Rows from `/status/datastore-usage`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct DatastoreUsage {
  pub store: String,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub total: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub used: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub avail: u64,
  /// Seconds until full as estimated by PBS, negative when unknown.
  #[serde(rename = "estimated-full-date", default)]
  pub estimated_full_date: Option<i64>,
}

/// Rows from `/admin/datastore/{store}/snapshots`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PbsSnapshotItem {
  #[serde(rename = "backup-type", default)]
  pub backup_type: String,
  #[serde(rename = "backup-id", default)]
  pub backup_id: String,
  #[serde(rename = "backup-time", default)]
  pub backup_time: i64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub size: u64,
  #[serde(default, deserialize_with = "bool_from_int")]
  pub protected: bool,
  #[serde(default)]
  pub verification: Option<PbsVerification>,
  #[serde(default)]
  pub ns: Option<String>,
  #[serde(default)]
  pub owner: Option<String>,
  #[serde(default)]
  pub comment: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PbsVerification {
  #[serde(default)]
  pub state: String,
  #[serde(default)]
  pub upid: Option<String>,
}

/// Job status rows shared by verify / sync / prune listings.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PbsJobStatus {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub store: String,
  #[serde(rename = "last-run-state", default)]
  pub last_run_state: Option<String>,
  #[serde(rename = "last-run-endtime", default)]
  pub last_run_endtime: Option<i64>,
  #[serde(rename = "next-run", default)]
  pub next_run: Option<i64>,
}

/// Rows from `/admin/gc`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct GarbageCollectionStatus {
  #[serde(default)]
  pub store: String,
  #[serde(rename = "last-run-state", default)]
  pub last_run_state: Option<String>,
  #[serde(rename = "last-run-endtime", default)]
  pub last_run_endtime: Option<i64>,
  #[serde(rename = "next-run", default)]
  pub next_run: Option<i64>,
  #[serde(rename = "removed-bytes", default)]
  pub removed_bytes: Option<u64>,
  #[serde(rename = "pending-bytes", default)]
  pub pending_bytes: Option<u64>,
}

impl ProxmoxClient {
  pub async fn pbs_node_status(&self) -> Result<PbsNodeStatus> {
    self.get("/nodes/localhost/status").await
  }

  pub async fn datastore_usage(
    &self,
  ) -> Result<Vec<DatastoreUsage>> {
    self.get("/status/datastore-usage").await
  }

  /// Backups in a datastore, optionally below one namespace.
  pub async fn datastore_snapshots(
    &self,
    store: &str,
    namespace: Option<&str>,
  ) -> Result<Vec<PbsSnapshotItem>> {
    let path = format!("/admin/datastore/{store}/snapshots");
    match namespace {
      Some(ns) => {
        self
          .get_with_query(&path, &[("ns", ns.to_string())])
          .await
      }
      None => self.get(&path).await,
    }
  }

  pub async fn verify_jobs(&self) -> Result<Vec<PbsJobStatus>> {
    self.get("/admin/verify").await
  }

  pub async fn sync_jobs(&self) -> Result<Vec<PbsJobStatus>> {
    self.get("/admin/sync").await
  }

  pub async fn prune_jobs(&self) -> Result<Vec<PbsJobStatus>> {
    self.get("/admin/prune").await
  }

  pub async fn garbage_collection_status(
    &self,
  ) -> Result<Vec<GarbageCollectionStatus>> {
    self.get("/admin/gc").await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn snapshot_rows_parse_with_verification() {
    let json = r#"[
      {"backup-type": "vm", "backup-id": "100",
       "backup-time": 1700000000, "size": 1073741824,
       "protected": 1,
       "verification": {"state": "ok", "upid": "UPID:..."}},
      {"backup-type": "host", "backup-id": "pmg1",
       "backup-time": 1700000001}
    ]"#;
    let rows: Vec<PbsSnapshotItem> =
      serde_json::from_str(json).unwrap();
    assert_eq!(rows[0].backup_type, "vm");
    assert!(rows[0].protected);
    assert_eq!(
      rows[0].verification.as_ref().unwrap().state,
      "ok"
    );
    assert_eq!(rows[1].backup_type, "host");
    assert!(rows[1].verification.is_none());
  }
}
