//! Proxmox VE operations.

use serde::Deserialize;

use crate::{
  ProxmoxClient,
  error::Result,
  wire::{bool_from_int, f64_flexible, u64_flexible},
};

#[derive(Deserialize, Debug, Clone, Default)]
pub struct VersionInfo {
  #[serde(default)]
  pub version: String,
  #[serde(default)]
  pub release: String,
}

/// Items from `/cluster/status`: one `cluster` row plus one row per
/// member node.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ClusterStatusItem {
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default)]
  pub name: String,
  /// Cluster row only.
  #[serde(default, deserialize_with = "bool_from_int")]
  pub quorate: bool,
  /// Node rows only.
  #[serde(default, deserialize_with = "bool_from_int")]
  pub online: bool,
  #[serde(default)]
  pub ip: Option<String>,
  #[serde(default)]
  pub nodes: Option<u32>,
}

/// Rows from `/cluster/resources`, the preferred bulk endpoint.
/// Server side it refreshes at a ~10s cadence.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ClusterResource {
  #[serde(default)]
  pub id: String,
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default)]
  pub node: Option<String>,
  #[serde(default)]
  pub vmid: Option<u32>,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default, deserialize_with = "f64_flexible")]
  pub cpu: f64,
  #[serde(default)]
  pub maxcpu: Option<f64>,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub mem: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub maxmem: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub disk: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub maxdisk: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub uptime: u64,
  #[serde(default, deserialize_with = "bool_from_int")]
  pub template: bool,
  #[serde(default)]
  pub tags: Option<String>,
  /// Storage rows only.
  #[serde(default)]
  pub storage: Option<String>,
  #[serde(default)]
  pub plugintype: Option<String>,
  #[serde(default, deserialize_with = "bool_from_int")]
  pub shared: bool,
  #[serde(default)]
  pub content: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct NodeListItem {
  pub node: String,
  #[serde(default)]
  pub status: String,
  #[serde(default, deserialize_with = "f64_flexible")]
  pub cpu: f64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub mem: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub maxmem: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub uptime: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct NodeStatusData {
  #[serde(default, deserialize_with = "f64_flexible")]
  pub cpu: f64,
  #[serde(default)]
  pub memory: MemoryInfo,
  #[serde(default)]
  pub rootfs: RootFsInfo,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub uptime: u64,
  #[serde(default)]
  pub loadavg: Vec<serde_json::Value>,
  #[serde(default)]
  pub kversion: String,
  /// Exposed by some installs with sensor packages; absent
  /// otherwise.
  #[serde(default)]
  pub temperature: Option<f64>,
}

impl NodeStatusData {
  /// loadavg arrives as strings on most releases.
  pub fn load_avg(&self) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (i, value) in self.loadavg.iter().take(3).enumerate() {
      out[i] = match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
      };
    }
    out
  }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct MemoryInfo {
  #[serde(default, deserialize_with = "u64_flexible")]
  pub total: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub used: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub free: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct RootFsInfo {
  #[serde(default, deserialize_with = "u64_flexible")]
  pub total: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub used: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub avail: u64,
}

/// Rows from `/nodes/{node}/qemu` and `/nodes/{node}/lxc`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct GuestStatusItem {
  pub vmid: u32,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub status: String,
  #[serde(default, deserialize_with = "f64_flexible")]
  pub cpu: f64,
  #[serde(default)]
  pub cpus: Option<f64>,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub mem: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub maxmem: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub disk: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub maxdisk: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub diskread: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub diskwrite: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub netin: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub netout: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub uptime: u64,
  #[serde(default, deserialize_with = "bool_from_int")]
  pub template: bool,
  #[serde(default)]
  pub tags: Option<String>,
  #[serde(default)]
  pub lock: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SnapshotItem {
  pub name: String,
  #[serde(default)]
  pub snaptime: Option<i64>,
  #[serde(default)]
  pub parent: Option<String>,
  #[serde(default, deserialize_with = "bool_from_int")]
  pub vmstate: bool,
  #[serde(default)]
  pub description: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct StorageStatusItem {
  pub storage: String,
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default)]
  pub content: String,
  #[serde(default, deserialize_with = "bool_from_int")]
  pub active: bool,
  #[serde(default, deserialize_with = "bool_from_int")]
  pub enabled: bool,
  #[serde(default, deserialize_with = "bool_from_int")]
  pub shared: bool,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub total: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub used: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub avail: u64,
}

/// Backup volumes from `/storage/{storage}/content?content=backup`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct BackupContentItem {
  pub volid: String,
  #[serde(default)]
  pub ctime: i64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub size: u64,
  #[serde(default)]
  pub vmid: Option<u32>,
  #[serde(default)]
  pub format: Option<String>,
  #[serde(default, deserialize_with = "bool_from_int")]
  pub protected: bool,
  #[serde(default)]
  pub verification: Option<VerificationState>,
  #[serde(default)]
  pub notes: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct VerificationState {
  #[serde(default)]
  pub state: String,
  #[serde(default)]
  pub upid: Option<String>,
}

/// Guest agent replies nest their payload one level deeper.
#[derive(Deserialize, Debug)]
pub struct AgentResult<T> {
  pub result: T,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AgentFsInfo {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub mountpoint: String,
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub total_bytes: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub used_bytes: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AgentInterface {
  #[serde(default)]
  pub name: String,
  #[serde(rename = "hardware-address", default)]
  pub hardware_address: String,
  #[serde(rename = "ip-addresses", default)]
  pub ip_addresses: Vec<AgentIpAddress>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AgentIpAddress {
  #[serde(rename = "ip-address", default)]
  pub ip_address: String,
  #[serde(rename = "ip-address-type", default)]
  pub ip_address_type: String,
  #[serde(default)]
  pub prefix: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PhysicalDisk {
  #[serde(default)]
  pub devpath: String,
  #[serde(default)]
  pub model: Option<String>,
  #[serde(default)]
  pub serial: Option<String>,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub size: u64,
  #[serde(default)]
  pub health: Option<String>,
  #[serde(default)]
  pub wearout: Option<serde_json::Value>,
  #[serde(rename = "type", default)]
  pub kind: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ZfsPoolItem {
  pub name: String,
  #[serde(default)]
  pub health: String,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub size: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub alloc: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub free: u64,
  #[serde(default, deserialize_with = "f64_flexible")]
  pub frag: f64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ZfsPoolDetail {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub state: String,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub errors: Option<String>,
  #[serde(default)]
  pub children: Vec<ZfsPoolDevice>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ZfsPoolDevice {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub state: String,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub read: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub write: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub cksum: u64,
  #[serde(default)]
  pub children: Vec<ZfsPoolDevice>,
}

impl ProxmoxClient {
  pub async fn version(&self) -> Result<VersionInfo> {
    self.get("/version").await
  }

  pub async fn cluster_status(
    &self,
  ) -> Result<Vec<ClusterStatusItem>> {
    self.get("/cluster/status").await
  }

  pub async fn cluster_resources(
    &self,
  ) -> Result<Vec<ClusterResource>> {
    self.get("/cluster/resources").await
  }

  pub async fn list_nodes(&self) -> Result<Vec<NodeListItem>> {
    self.get("/nodes").await
  }

  pub async fn node_status(
    &self,
    node: &str,
  ) -> Result<NodeStatusData> {
    self.get(&format!("/nodes/{node}/status")).await
  }

  pub async fn list_qemu(
    &self,
    node: &str,
  ) -> Result<Vec<GuestStatusItem>> {
    self.get(&format!("/nodes/{node}/qemu")).await
  }

  pub async fn list_lxc(
    &self,
    node: &str,
  ) -> Result<Vec<GuestStatusItem>> {
    self.get(&format!("/nodes/{node}/lxc")).await
  }

  /// `guest_kind` is the api path segment: `qemu` or `lxc`.
  pub async fn guest_snapshots(
    &self,
    node: &str,
    guest_kind: &str,
    vmid: u32,
  ) -> Result<Vec<SnapshotItem>> {
    self
      .get(&format!("/nodes/{node}/{guest_kind}/{vmid}/snapshot"))
      .await
  }

  pub async fn node_storage(
    &self,
    node: &str,
  ) -> Result<Vec<StorageStatusItem>> {
    self.get(&format!("/nodes/{node}/storage")).await
  }

  pub async fn storage_backups(
    &self,
    node: &str,
    storage: &str,
  ) -> Result<Vec<BackupContentItem>> {
    self
      .get_with_query(
        &format!("/nodes/{node}/storage/{storage}/content"),
        &[("content", "backup".to_string())],
      )
      .await
  }

  pub async fn guest_fsinfo(
    &self,
    node: &str,
    vmid: u32,
  ) -> Result<Vec<AgentFsInfo>> {
    let result: AgentResult<Vec<AgentFsInfo>> = self
      .get(&format!("/nodes/{node}/qemu/{vmid}/agent/get-fsinfo"))
      .await?;
    Ok(result.result)
  }

  pub async fn guest_network_interfaces(
    &self,
    node: &str,
    vmid: u32,
  ) -> Result<Vec<AgentInterface>> {
    let result: AgentResult<Vec<AgentInterface>> = self
      .get(&format!(
        "/nodes/{node}/qemu/{vmid}/agent/network-get-interfaces"
      ))
      .await?;
    Ok(result.result)
  }

  pub async fn node_disks(
    &self,
    node: &str,
  ) -> Result<Vec<PhysicalDisk>> {
    self.get(&format!("/nodes/{node}/disks/list")).await
  }

  pub async fn zfs_pools(
    &self,
    node: &str,
  ) -> Result<Vec<ZfsPoolItem>> {
    self.get(&format!("/nodes/{node}/disks/zfs")).await
  }

  pub async fn zfs_pool_detail(
    &self,
    node: &str,
    name: &str,
  ) -> Result<ZfsPoolDetail> {
    self.get(&format!("/nodes/{node}/disks/zfs/{name}")).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cluster_resources_parse_mixed_payload() {
    let json = r#"[
      {"id": "node/pve1", "type": "node", "node": "pve1",
       "status": "online", "cpu": 0.12, "maxcpu": 8,
       "mem": 8589934592, "maxmem": 17179869184, "uptime": 86400},
      {"id": "qemu/100", "type": "qemu", "node": "pve1",
       "vmid": 100, "name": "web", "status": "running",
       "cpu": "0.5", "mem": "1024", "maxmem": 2048,
       "template": 0, "tags": "prod;web"},
      {"id": "storage/pve1/local", "type": "storage",
       "node": "pve1", "storage": "local", "status": "available",
       "plugintype": "dir", "shared": 0, "disk": 100, "maxdisk": 200}
    ]"#;
    let resources: Vec<ClusterResource> =
      serde_json::from_str(json).unwrap();
    assert_eq!(resources.len(), 3);
    assert_eq!(resources[1].vmid, Some(100));
    assert_eq!(resources[1].mem, 1024);
    assert!(!resources[1].template);
    assert_eq!(resources[2].storage.as_deref(), Some("local"));
  }

  #[test]
  fn load_avg_parses_string_array() {
    let status: NodeStatusData = serde_json::from_str(
      r#"{"cpu": 0.1, "loadavg": ["0.50", "0.40", 0.30],
          "uptime": 100,
          "memory": {"total": 100, "used": 50, "free": 50}}"#,
    )
    .unwrap();
    assert_eq!(status.load_avg(), [0.5, 0.4, 0.3]);
  }
}
