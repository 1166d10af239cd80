//! One PVE poll cycle: pull the world from the instance, project it
//! into entities, replace the store buckets and sweep the alerts.

use proxmox_client::{
  ClusterResource, ProxmoxClient, SnapshotItem,
  error::{Error, Result},
};
use vigil_client::entities::{
  ids,
  backup::{Backup, BackupKind, Snapshot},
  guest::{Guest, GuestIo, GuestKind, GuestStatus},
  instance::Instance,
  node::{Node, NodeStatus, UsageStats},
  storage::{Storage, ZfsPool},
};

use crate::{
  alert::AlertManager, monitor::tracker::change_hash, store::Store,
};

pub struct PvePollOutcome {
  pub change_hash: String,
  /// A cluster member is down while the instance still answers.
  pub degraded: bool,
}

pub async fn poll_pve(
  client: &ProxmoxClient,
  instance: &Instance,
  store: &Store,
  alerts: &AlertManager,
  now: i64,
) -> Result<PvePollOutcome> {
  let cluster = client.cluster_status().await?;
  let cluster_row = cluster.iter().find(|i| i.kind == "cluster");
  let cluster_name = cluster_row.map(|c| c.name.clone());
  let is_cluster = cluster_row.is_some();
  let member_down = cluster
    .iter()
    .any(|i| i.kind == "node" && !i.online);

  // `/cluster/resources` is the preferred bulk endpoint and answers
  // on standalone nodes too. Installs where it is missing fall back
  // to per-node assembly.
  let resources = match client.cluster_resources().await {
    Ok(resources) => resources,
    Err(Error::NotFound(_)) if !is_cluster => {
      per_node_resources(client).await?
    }
    Err(e) => return Err(e),
  };

  let mut nodes = build_nodes(
    client,
    instance,
    &resources,
    cluster_name.as_deref(),
    is_cluster,
  )
  .await;
  nodes.sort_by(|a, b| a.id.cmp(&b.id));

  let mut guests = build_guests(client, instance, &resources).await;
  guests.sort_by(|a, b| a.id.cmp(&b.id));

  let mut storage = build_storage(instance, &resources);
  storage.sort_by(|a, b| a.id.cmp(&b.id));

  let online_nodes: Vec<&Node> = nodes
    .iter()
    .filter(|n| n.status == NodeStatus::Online)
    .collect();

  // Resources that 404 mid-poll were deleted upstream; their ids
  // are pruned from the store and from the buckets being written.
  let mut vanished: Vec<String> = Vec::new();

  let mut backups = collect_backups(
    client,
    instance,
    &online_nodes,
    &storage,
    &mut vanished,
  )
  .await;
  backups.sort_by(|a, b| a.id.cmp(&b.id));

  let mut snapshots =
    collect_snapshots(client, instance, &guests, &mut vanished)
      .await;
  snapshots.sort_by(|a, b| a.id.cmp(&b.id));

  let mut zfs_pools =
    collect_zfs_pools(client, instance, &online_nodes).await;
  zfs_pools.sort_by(|a, b| {
    (a.node.as_str(), a.name.as_str())
      .cmp(&(b.node.as_str(), b.name.as_str()))
  });

  if !vanished.is_empty() {
    for id in &vanished {
      tracing::info!(
        instance = %instance.id,
        entity = %id,
        "pruning entity deleted upstream"
      );
      store.prune_entity(&instance.id, id);
    }
    guests.retain(|g| !vanished.contains(&g.id));
    storage.retain(|s| !vanished.contains(&s.id));
  }

  let hash = change_hash(&(
    &nodes, &guests, &storage, &backups, &snapshots, &zfs_pools,
  ));

  store.replace_nodes(&instance.id, nodes.clone());
  store.replace_guests(&instance.id, guests.clone());
  store.replace_storage(&instance.id, storage.clone());
  store.replace_backups(&instance.id, backups.clone());
  store.replace_snapshots(&instance.id, snapshots.clone());
  store.replace_zfs_pools(&instance.id, zfs_pools.clone());

  alerts.check_nodes(&nodes, now);
  alerts.check_guests(&guests, now);
  alerts.check_storage(&storage, now);
  alerts.check_backup_age(&guests, &backups, now);
  alerts.check_snapshot_age(&guests, &snapshots, now);
  alerts.check_zfs_pools(&zfs_pools, now);

  Ok(PvePollOutcome { change_hash: hash, degraded: member_down })
}

/// Synthesize the `/cluster/resources` shape from the per-node
/// endpoints, so the rest of the projection has one input format.
async fn per_node_resources(
  client: &ProxmoxClient,
) -> Result<Vec<ClusterResource>> {
  let mut resources = Vec::new();
  for node in client.list_nodes().await? {
    resources.push(ClusterResource {
      id: format!("node/{}", node.node),
      kind: "node".to_string(),
      node: Some(node.node.clone()),
      status: Some(node.status.clone()),
      cpu: node.cpu,
      mem: node.mem,
      maxmem: node.maxmem,
      uptime: node.uptime,
      ..Default::default()
    });
    if node.status != "online" {
      continue;
    }
    let qemu = client.list_qemu(&node.node).await?;
    let lxc = client.list_lxc(&node.node).await?;
    for (items, kind) in [(qemu, "qemu"), (lxc, "lxc")] {
      for guest in items {
        resources.push(ClusterResource {
          id: format!("{kind}/{}", guest.vmid),
          kind: kind.to_string(),
          node: Some(node.node.clone()),
          vmid: Some(guest.vmid),
          name: guest.name,
          status: Some(guest.status),
          cpu: guest.cpu,
          mem: guest.mem,
          maxmem: guest.maxmem,
          disk: guest.disk,
          maxdisk: guest.maxdisk,
          uptime: guest.uptime,
          template: guest.template,
          tags: guest.tags,
          ..Default::default()
        });
      }
    }
    for storage in client.node_storage(&node.node).await? {
      resources.push(ClusterResource {
        id: format!("storage/{}/{}", node.node, storage.storage),
        kind: "storage".to_string(),
        node: Some(node.node.clone()),
        storage: Some(storage.storage),
        status: Some(
          if storage.active { "available" } else { "unavailable" }
            .to_string(),
        ),
        plugintype: Some(storage.kind),
        shared: storage.shared,
        content: Some(storage.content),
        disk: storage.used,
        maxdisk: storage.total,
        ..Default::default()
      });
    }
  }
  Ok(resources)
}

async fn build_nodes(
  client: &ProxmoxClient,
  instance: &Instance,
  resources: &[ClusterResource],
  cluster_name: Option<&str>,
  is_cluster: bool,
) -> Vec<Node> {
  let mut nodes = Vec::new();
  for resource in resources.iter().filter(|r| r.kind == "node") {
    let Some(name) = resource.node.as_deref() else {
      continue;
    };
    let online =
      resource.status.as_deref() == Some("online");
    let mut node = Node {
      id: ids::node_id(&instance.id, name),
      name: name.to_string(),
      display_name: String::new(),
      instance: instance.id.clone(),
      status: if online {
        NodeStatus::Online
      } else {
        NodeStatus::Offline
      },
      cpu: resource.cpu,
      memory: UsageStats::new(resource.maxmem, resource.mem),
      disk: UsageStats::new(resource.maxdisk, resource.disk),
      uptime_sec: resource.uptime,
      load_avg: [0.0; 3],
      temperature: None,
      cluster_name: cluster_name.map(Into::into),
      is_cluster_member: is_cluster,
    };
    // Load / temperature only come from the per-node endpoint.
    // A failure here degrades the node detail, not the poll.
    if online {
      match client.node_status(name).await {
        Ok(status) => {
          node.load_avg = status.load_avg();
          node.temperature = status.temperature;
          if status.memory.total > 0 {
            node.memory = UsageStats::new(
              status.memory.total,
              status.memory.used,
            );
          }
          if status.rootfs.total > 0 {
            node.disk = UsageStats::new(
              status.rootfs.total,
              status.rootfs.used,
            );
          }
        }
        Err(e) => {
          tracing::debug!(
            instance = %instance.id,
            node = name,
            "node status unavailable | {e}"
          );
        }
      }
    }
    nodes.push(node);
  }
  nodes
}

async fn build_guests(
  client: &ProxmoxClient,
  instance: &Instance,
  resources: &[ClusterResource],
) -> Vec<Guest> {
  let mut guests = Vec::new();
  for resource in resources
    .iter()
    .filter(|r| r.kind == "qemu" || r.kind == "lxc")
  {
    if resource.template {
      continue;
    }
    let (Some(vmid), Some(node)) =
      (resource.vmid, resource.node.as_deref())
    else {
      continue;
    };
    let status = match resource.status.as_deref() {
      Some("running") => GuestStatus::Running,
      Some("stopped") => GuestStatus::Stopped,
      Some("paused") => GuestStatus::Paused,
      _ => GuestStatus::Unknown,
    };
    let kind = if resource.kind == "qemu" {
      GuestKind::Qemu
    } else {
      GuestKind::Lxc
    };
    let mut guest = Guest {
      id: ids::guest_id(&instance.id, node, vmid),
      vmid,
      name: resource
        .name
        .clone()
        .unwrap_or_else(|| vmid.to_string()),
      node: node.to_string(),
      instance: instance.id.clone(),
      kind,
      status,
      cpu: resource.cpu,
      memory: UsageStats::new(resource.maxmem, resource.mem),
      disk: if resource.maxdisk > 0 && resource.disk > 0 {
        UsageStats::new(resource.maxdisk, resource.disk)
      } else {
        UsageStats::unknown()
      },
      disk_status_reason: None,
      io: GuestIo::default(),
      uptime_sec: resource.uptime,
      tags: resource
        .tags
        .as_deref()
        .map(split_tags)
        .unwrap_or_default(),
      os_name: None,
      os_version: None,
      ip_addresses: None,
      network_ifaces: None,
    };
    if guest.status == GuestStatus::Running
      && kind == GuestKind::Qemu
    {
      enrich_from_agent(client, node, vmid, &mut guest).await;
    }
    if guest.disk.usage < 0.0
      && guest.status == GuestStatus::Running
    {
      guest.disk_status_reason =
        Some("guest agent unavailable".to_string());
    }
    guests.push(guest.zero_if_not_running());
  }
  guests
}

/// QEMU filesystem / address detail needs the guest agent; absence
/// is normal and leaves the resource-level numbers in place.
async fn enrich_from_agent(
  client: &ProxmoxClient,
  node: &str,
  vmid: u32,
  guest: &mut Guest,
) {
  if let Ok(filesystems) = client.guest_fsinfo(node, vmid).await {
    let (mut total, mut used) = (0u64, 0u64);
    for fs in filesystems {
      // Pseudo filesystems report zero totals.
      if fs.total_bytes == 0 {
        continue;
      }
      total += fs.total_bytes;
      used += fs.used_bytes;
    }
    if total > 0 {
      guest.disk = UsageStats::new(total, used);
    }
  }
  if let Ok(interfaces) =
    client.guest_network_interfaces(node, vmid).await
  {
    let mut addresses = Vec::new();
    for interface in &interfaces {
      for address in &interface.ip_addresses {
        let ip = address.ip_address.as_str();
        if ip.is_empty() || ip == "127.0.0.1" || ip == "::1" {
          continue;
        }
        addresses.push(ip.to_string());
      }
    }
    if !addresses.is_empty() {
      guest.ip_addresses = Some(addresses);
    }
    guest.network_ifaces = Some(
      interfaces
        .into_iter()
        .filter(|i| i.name != "lo")
        .map(|i| vigil_client::entities::guest::GuestNetworkIface {
          name: i.name,
          mac: i.hardware_address,
          addresses: i
            .ip_addresses
            .into_iter()
            .map(|a| a.ip_address)
            .collect(),
        })
        .collect(),
    );
  }
}

fn split_tags(tags: &str) -> Vec<String> {
  tags
    .split(';')
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .map(Into::into)
    .collect()
}

/// Shared storages appear once per node in `/cluster/resources`;
/// collapse them into a single `shared` entry carrying the node
/// membership list.
fn build_storage(
  instance: &Instance,
  resources: &[ClusterResource],
) -> Vec<Storage> {
  let mut out: Vec<Storage> = Vec::new();
  for resource in resources.iter().filter(|r| r.kind == "storage") {
    let (Some(name), Some(node)) =
      (resource.storage.as_deref(), resource.node.as_deref())
    else {
      continue;
    };
    if resource.shared {
      if let Some(existing) = out
        .iter_mut()
        .find(|s| s.shared && s.name == name)
      {
        if !existing.nodes.iter().any(|n| n == node) {
          existing.nodes.push(node.to_string());
          existing.nodes.sort();
        }
        continue;
      }
    }
    let storage_node = if resource.shared {
      ids::SHARED_STORAGE_NODE
    } else {
      node
    };
    let kind =
      resource.plugintype.clone().unwrap_or_default();
    out.push(Storage {
      id: ids::storage_id(&instance.id, storage_node, name),
      name: name.to_string(),
      node: storage_node.to_string(),
      instance: instance.id.clone(),
      zfs_pool: (kind == "zfspool").then(|| name.to_string()),
      kind,
      status: resource
        .status
        .clone()
        .unwrap_or_else(|| "unknown".to_string()),
      total: resource.maxdisk,
      used: resource.disk,
      free: resource.maxdisk.saturating_sub(resource.disk),
      usage: if resource.maxdisk > 0 {
        100.0 * resource.disk as f64 / resource.maxdisk as f64
      } else {
        -1.0
      },
      content: resource.content.clone().unwrap_or_default(),
      shared: resource.shared,
      active: resource.status.as_deref() == Some("available"),
      nodes: if resource.shared {
        vec![node.to_string()]
      } else {
        Vec::new()
      },
    });
  }
  out
}

async fn collect_backups(
  client: &ProxmoxClient,
  instance: &Instance,
  online_nodes: &[&Node],
  storage: &[Storage],
  vanished: &mut Vec<String>,
) -> Vec<Backup> {
  let mut backups = Vec::new();
  for entry in storage {
    if !entry.content.contains("backup") || !entry.active {
      continue;
    }
    // Shared storages are queried through one online member.
    let node = if entry.shared {
      let member = online_nodes
        .iter()
        .find(|n| entry.nodes.contains(&n.name));
      match member {
        Some(node) => node.name.clone(),
        None => continue,
      }
    } else {
      if !online_nodes.iter().any(|n| n.name == entry.node) {
        continue;
      }
      entry.node.clone()
    };
    match client.storage_backups(&node, &entry.name).await {
      Ok(items) => {
        for item in items {
          let vmid = item.vmid.unwrap_or_else(|| {
            parse_vmid_from_volid(&item.volid)
          });
          backups.push(Backup {
            id: format!("{}-{}", instance.id, item.volid),
            instance: instance.id.clone(),
            datastore: entry.name.clone(),
            vmid,
            kind: backup_kind_from_volid(&item.volid),
            time: item.ctime,
            size: item.size,
            protected: item.protected,
            verified: item
              .verification
              .as_ref()
              .map(|v| v.state == "ok")
              .unwrap_or(false),
            verification: item.verification.map(|v| v.state),
            namespace: None,
          });
        }
      }
      // The storage itself is gone: prune it rather than keeping a
      // stale entry around until the instance is reconfigured.
      Err(Error::NotFound(_)) => {
        vanished.push(entry.id.clone());
      }
      Err(e) => {
        tracing::warn!(
          instance = %instance.id,
          storage = %entry.name,
          "backup listing failed | {e}"
        );
      }
    }
  }
  backups
}

/// `local:backup/vzdump-qemu-100-...` -> 100
fn parse_vmid_from_volid(volid: &str) -> u32 {
  volid
    .rsplit('/')
    .next()
    .and_then(|name| {
      name
        .split('-')
        .find_map(|part| part.parse::<u32>().ok())
    })
    .unwrap_or(0)
}

fn backup_kind_from_volid(volid: &str) -> BackupKind {
  if volid.contains("-lxc-") || volid.contains("vzdump-lxc") {
    BackupKind::Ct
  } else if volid.contains("-host-") {
    BackupKind::Host
  } else {
    BackupKind::Vm
  }
}

async fn collect_snapshots(
  client: &ProxmoxClient,
  instance: &Instance,
  guests: &[Guest],
  vanished: &mut Vec<String>,
) -> Vec<Snapshot> {
  let mut snapshots = Vec::new();
  for guest in guests {
    let guest_kind = match guest.kind {
      GuestKind::Qemu => "qemu",
      GuestKind::Lxc => "lxc",
    };
    let items = match client
      .guest_snapshots(&guest.node, guest_kind, guest.vmid)
      .await
    {
      Ok(items) => items,
      // The guest was deleted between the resource listing and
      // this call: prune it rather than writing it back.
      Err(Error::NotFound(_)) => {
        vanished.push(guest.id.clone());
        continue;
      }
      Err(e) => {
        tracing::debug!(
          instance = %instance.id,
          guest = %guest.id,
          "snapshot listing failed | {e}"
        );
        continue;
      }
    };
    for item in items {
      // The API always appends a synthetic `current` entry.
      if item.name == "current" {
        continue;
      }
      snapshots.push(snapshot_from_item(instance, guest, item));
    }
  }
  snapshots
}

fn snapshot_from_item(
  instance: &Instance,
  guest: &Guest,
  item: SnapshotItem,
) -> Snapshot {
  Snapshot {
    id: format!("{}-{}", guest.id, item.name),
    vmid: guest.vmid,
    node: guest.node.clone(),
    instance: instance.id.clone(),
    time: item.snaptime.unwrap_or_default(),
    name: item.name,
    parent: item.parent,
    vm_state: item.vmstate,
    size_bytes: None,
  }
}

async fn collect_zfs_pools(
  client: &ProxmoxClient,
  instance: &Instance,
  online_nodes: &[&Node],
) -> Vec<ZfsPool> {
  let mut pools = Vec::new();
  for node in online_nodes {
    let items = match client.zfs_pools(&node.name).await {
      // Nodes without zfs return 404 or an empty list.
      Ok(items) => items,
      Err(e) => {
        tracing::debug!(
          instance = %instance.id,
          node = %node.name,
          "zfs listing unavailable | {e}"
        );
        continue;
      }
    };
    for item in items {
      let mut errored_devices = Vec::new();
      match client.zfs_pool_detail(&node.name, &item.name).await {
        Ok(detail) => {
          collect_errored_devices(
            &detail.children,
            &mut errored_devices,
          );
        }
        Err(e) => {
          tracing::debug!(
            instance = %instance.id,
            pool = %item.name,
            "zfs detail unavailable | {e}"
          );
        }
      }
      pools.push(ZfsPool {
        name: item.name,
        node: node.name.clone(),
        instance: instance.id.clone(),
        health: item.health,
        size: item.size,
        allocated: item.alloc,
        fragmentation: item.frag,
        errored_devices,
      });
    }
  }
  pools
}

fn collect_errored_devices(
  devices: &[proxmox_client::ZfsPoolDevice],
  out: &mut Vec<String>,
) {
  for device in devices {
    if device.read + device.write + device.cksum > 0 {
      out.push(device.name.clone());
    }
    collect_errored_devices(&device.children, out);
  }
}
