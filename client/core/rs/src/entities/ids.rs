//! Canonical resource id builders.
//!
//! Every id comparison in Vigil goes through these functions, so the
//! rules live in exactly one place.

/// `{instance}-{node}`
pub fn node_id(instance: &str, node: &str) -> String {
  format!("{instance}-{node}")
}

/// `{instance}-{node}-{vmid}`
pub fn guest_id(instance: &str, node: &str, vmid: u32) -> String {
  format!("{instance}-{node}-{vmid}")
}

/// `{instance}-{node}-{storage}`. Shared storages use the literal
/// node name `shared`.
pub fn storage_id(
  instance: &str,
  node: &str,
  storage: &str,
) -> String {
  format!("{instance}-{node}-{storage}")
}

pub const SHARED_STORAGE_NODE: &str = "shared";

/// `docker:{machine_id}`, falling back to
/// `docker:{agent_id}-{hostname}` when the agent reports no machine
/// id. When two distinct agents claim the same machine id, the
/// second host id gets the agent id suffixed to stay unique.
pub fn docker_host_id(
  machine_id: Option<&str>,
  agent_id: &str,
  hostname: &str,
) -> String {
  match machine_id {
    Some(machine_id) if !machine_id.is_empty() => {
      format!("docker:{machine_id}")
    }
    _ => format!("docker:{agent_id}-{hostname}"),
  }
}

pub fn docker_host_id_disambiguated(
  machine_id: &str,
  agent_id: &str,
) -> String {
  format!("docker:{machine_id}-{agent_id}")
}

/// `{resource_id}-{metric}`. At most one active alert may exist per
/// id.
pub fn alert_id(resource_id: &str, metric: &str) -> String {
  format!("{resource_id}-{metric}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builders_are_deterministic() {
    assert_eq!(node_id("pve1", "node-a"), "pve1-node-a");
    assert_eq!(guest_id("pve1", "node-a", 100), "pve1-node-a-100");
    assert_eq!(
      storage_id("pve1", SHARED_STORAGE_NODE, "cephfs"),
      "pve1-shared-cephfs"
    );
    assert_eq!(alert_id("pve1-node-a-100", "cpu"), "pve1-node-a-100-cpu");
  }

  #[test]
  fn docker_id_prefers_machine_id() {
    assert_eq!(
      docker_host_id(Some("abc123"), "agent-1", "web-1"),
      "docker:abc123"
    );
    assert_eq!(
      docker_host_id(None, "agent-1", "web-1"),
      "docker:agent-1-web-1"
    );
    assert_eq!(
      docker_host_id(Some(""), "agent-1", "web-1"),
      "docker:agent-1-web-1"
    );
    assert_eq!(
      docker_host_id_disambiguated("abc123", "agent-2"),
      "docker:abc123-agent-2"
    );
  }
}
