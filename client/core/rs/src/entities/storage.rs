use serde::{Deserialize, Serialize};

/// A PVE storage, either bound to one node or shared clusterwide.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Storage {
  /// `{instance}-{node}-{name}`, see [super::ids::storage_id].
  pub id: String,
  pub name: String,
  /// Owning node, or the literal `shared`.
  pub node: String,
  pub instance: String,
  /// Storage plugin type, eg. `dir`, `zfspool`, `cephfs`.
  #[serde(rename = "type")]
  pub kind: String,
  /// `available` / `unavailable` as reported.
  #[serde(default)]
  pub status: String,
  pub total: u64,
  pub used: u64,
  pub free: u64,
  /// Percent in `[0, 100]`, `-1` when unknown.
  pub usage: f64,
  /// Allowed content types, eg. `images,rootdir`.
  #[serde(default)]
  pub content: String,
  #[serde(default)]
  pub shared: bool,
  #[serde(default)]
  pub active: bool,
  /// Backing zfs pool for zfspool storages.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub zfs_pool: Option<String>,
  /// Nodes with access, populated for shared storage.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub nodes: Vec<String>,
}

/// A zfs pool with its reported health.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ZfsPool {
  pub name: String,
  pub node: String,
  pub instance: String,
  /// `ONLINE`, `DEGRADED`, `FAULTED`, ...
  pub health: String,
  #[serde(default)]
  pub size: u64,
  #[serde(default)]
  pub allocated: u64,
  #[serde(default)]
  pub fragmentation: f64,
  /// Devices with non-zero error counters.
  #[serde(default)]
  pub errored_devices: Vec<String>,
}

impl ZfsPool {
  pub fn is_healthy(&self) -> bool {
    self.health.eq_ignore_ascii_case("online")
      && self.errored_devices.is_empty()
  }
}
