//! The authoritative in-memory world view.
//!
//! One [Store] instance holds everything the pollers and the docker
//! agent channel have learned. Writers replace whole per-instance
//! buckets under a single write lock, so readers never observe torn
//! collections. Every mutation that changes the world emits a delta
//! on the broadcast channel feeding websocket subscribers.

use std::{
  collections::HashMap,
  sync::RwLock,
};

use serde::Serialize;
use tokio::sync::broadcast;
use vigil_client::{
  entities::{
    ConnectionHealth, InstanceKind,
    backup::{Backup, Snapshot},
    docker::DockerHost,
    guest::{Guest, GuestStatus},
    node::{Node, NodeStatus},
    pbs::PbsSummary,
    pmg::PmgSummary,
    storage::{Storage, ZfsPool},
    vigil_timestamp,
  },
  ws::{WsEvent, WsEventKind},
};

/// Bounded fan-out buffer per subscriber. Slow subscribers lag and
/// are dropped by the websocket layer.
pub const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Default)]
struct World {
  nodes: HashMap<String, Node>,
  guests: HashMap<String, Guest>,
  storage: HashMap<String, Storage>,
  /// Keyed by instance id.
  backups: HashMap<String, Vec<Backup>>,
  /// Keyed by instance id.
  snapshots: HashMap<String, Vec<Snapshot>>,
  /// Keyed by instance id.
  zfs_pools: HashMap<String, Vec<ZfsPool>>,
  pbs: HashMap<String, PbsSummary>,
  pmg: HashMap<String, PmgSummary>,
  docker_hosts: HashMap<String, DockerHost>,
  /// Keyed by `{kind}:{instance}`.
  connection_health: HashMap<String, ConnectionHealth>,
}

pub struct Store {
  world: RwLock<World>,
  events: broadcast::Sender<WsEvent>,
}

impl Default for Store {
  fn default() -> Self {
    let (events, _) = broadcast::channel(SUBSCRIBER_BUFFER);
    Store { world: RwLock::new(World::default()), events }
  }
}

pub fn health_key(kind: InstanceKind, instance: &str) -> String {
  format!("{kind}:{instance}")
}

impl Store {
  pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
    self.events.subscribe()
  }

  /// Alert manager and docker channel share this sender.
  pub fn events(&self) -> broadcast::Sender<WsEvent> {
    self.events.clone()
  }

  fn emit(&self, kind: WsEventKind, payload: impl Serialize) {
    match WsEvent::new(kind, payload) {
      // Send only fails with no subscribers, which is fine.
      Ok(event) => {
        let _ = self.events.send(event);
      }
      Err(e) => {
        tracing::error!("failed to serialize {kind} event | {e:#}")
      }
    }
  }

  pub fn replace_nodes(&self, instance: &str, mut nodes: Vec<Node>) {
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    {
      let mut world = self.world.write().unwrap();
      world.nodes.retain(|_, n| n.instance != instance);
      world
        .nodes
        .extend(nodes.iter().cloned().map(|n| (n.id.clone(), n)));
    }
    self.emit(
      WsEventKind::NodesReplaced,
      serde_json::json!({ "instance": instance, "nodes": nodes }),
    );
  }

  pub fn replace_guests(&self, instance: &str, mut guests: Vec<Guest>) {
    guests.sort_by(|a, b| a.id.cmp(&b.id));
    {
      let mut world = self.world.write().unwrap();
      world.guests.retain(|_, g| g.instance != instance);
      world
        .guests
        .extend(guests.iter().cloned().map(|g| (g.id.clone(), g)));
    }
    self.emit(
      WsEventKind::GuestsReplaced,
      serde_json::json!({ "instance": instance, "guests": guests }),
    );
  }

  pub fn replace_storage(
    &self,
    instance: &str,
    mut storage: Vec<Storage>,
  ) {
    storage.sort_by(|a, b| a.id.cmp(&b.id));
    {
      let mut world = self.world.write().unwrap();
      world.storage.retain(|_, s| s.instance != instance);
      world
        .storage
        .extend(storage.iter().cloned().map(|s| (s.id.clone(), s)));
    }
    self.emit(
      WsEventKind::StorageReplaced,
      serde_json::json!({ "instance": instance, "storage": storage }),
    );
  }

  pub fn replace_backups(
    &self,
    instance: &str,
    mut backups: Vec<Backup>,
  ) {
    backups.sort_by(|a, b| a.id.cmp(&b.id));
    self
      .world
      .write()
      .unwrap()
      .backups
      .insert(instance.to_string(), backups.clone());
    self.emit(
      WsEventKind::BackupsReplaced,
      serde_json::json!({ "instance": instance, "backups": backups }),
    );
  }

  pub fn replace_snapshots(
    &self,
    instance: &str,
    mut snapshots: Vec<Snapshot>,
  ) {
    snapshots.sort_by(|a, b| a.id.cmp(&b.id));
    self
      .world
      .write()
      .unwrap()
      .snapshots
      .insert(instance.to_string(), snapshots.clone());
    self.emit(
      WsEventKind::GuestSnapshotsReplaced,
      serde_json::json!({
        "instance": instance,
        "snapshots": snapshots,
      }),
    );
  }

  pub fn replace_zfs_pools(
    &self,
    instance: &str,
    mut pools: Vec<ZfsPool>,
  ) {
    pools.sort_by(|a, b| (a.node.clone(), a.name.clone()).cmp(&(
      b.node.clone(),
      b.name.clone(),
    )));
    self
      .world
      .write()
      .unwrap()
      .zfs_pools
      .insert(instance.to_string(), pools);
  }

  pub fn set_pbs_summary(&self, summary: PbsSummary) {
    let instance = summary.instance.clone();
    self
      .world
      .write()
      .unwrap()
      .pbs
      .insert(instance.clone(), summary.clone());
    self.emit(
      WsEventKind::PbsReplaced,
      serde_json::json!({ "instance": instance, "pbs": summary }),
    );
  }

  pub fn set_pmg_summary(&self, summary: PmgSummary) {
    let instance = summary.instance.clone();
    self
      .world
      .write()
      .unwrap()
      .pmg
      .insert(instance.clone(), summary.clone());
    self.emit(
      WsEventKind::PmgReplaced,
      serde_json::json!({ "instance": instance, "pmg": summary }),
    );
  }

  pub fn upsert_docker_host(&self, host: DockerHost) {
    self
      .world
      .write()
      .unwrap()
      .docker_hosts
      .insert(host.id.clone(), host.clone());
    self.emit(WsEventKind::DockerHostUpdated, host);
  }

  pub fn docker_host(&self, id: &str) -> Option<DockerHost> {
    self.world.read().unwrap().docker_hosts.get(id).cloned()
  }

  pub fn docker_hosts(&self) -> Vec<DockerHost> {
    let mut hosts: Vec<DockerHost> = self
      .world
      .read()
      .unwrap()
      .docker_hosts
      .values()
      .cloned()
      .collect();
    hosts.sort_by(|a, b| a.id.cmp(&b.id));
    hosts
  }

  /// The pending command marker is always mutated together with the
  /// command queue, so the flag and the queue cannot drift apart.
  pub fn set_docker_pending_command(
    &self,
    host_id: &str,
    command_id: Option<String>,
  ) {
    let updated = {
      let mut world = self.world.write().unwrap();
      match world.docker_hosts.get_mut(host_id) {
        Some(host) => {
          host.pending_command = command_id;
          Some(host.clone())
        }
        None => None,
      }
    };
    if let Some(host) = updated {
      self.emit(WsEventKind::DockerHostUpdated, host);
    }
  }

  pub fn remove_docker_host(&self, id: &str) -> Option<DockerHost> {
    let removed =
      self.world.write().unwrap().docker_hosts.remove(id);
    if removed.is_some() {
      self.emit(
        WsEventKind::DockerHostRemoved,
        serde_json::json!({ "id": id }),
      );
    }
    removed
  }

  pub fn set_connection_health(
    &self,
    kind: InstanceKind,
    instance: &str,
    health: ConnectionHealth,
  ) {
    let key = health_key(kind, instance);
    let changed = {
      let mut world = self.world.write().unwrap();
      let changed = world.connection_health.get(&key) != Some(&health);
      world.connection_health.insert(key.clone(), health.clone());
      changed
    };
    if changed {
      self.emit(
        WsEventKind::ConnectionHealth,
        serde_json::json!({ "instance": key, "health": health }),
      );
    }
  }

  pub fn connection_health(
    &self,
    kind: InstanceKind,
    instance: &str,
  ) -> Option<ConnectionHealth> {
    self
      .world
      .read()
      .unwrap()
      .connection_health
      .get(&health_key(kind, instance))
      .cloned()
  }

  /// Remove one vanished node / guest / storage entry by id,
  /// re-emitting the owning bucket so subscribers converge. Used
  /// when an upstream call 404s for a resource that no longer
  /// exists. Returns whether anything was removed.
  pub fn prune_entity(
    &self,
    instance: &str,
    entity_id: &str,
  ) -> bool {
    let mut world = self.world.write().unwrap();
    if world.guests.remove(entity_id).is_some() {
      let mut guests: Vec<Guest> = world
        .guests
        .values()
        .filter(|g| g.instance == instance)
        .cloned()
        .collect();
      drop(world);
      guests.sort_by(|a, b| a.id.cmp(&b.id));
      self.emit(
        WsEventKind::GuestsReplaced,
        serde_json::json!({ "instance": instance, "guests": guests }),
      );
      return true;
    }
    if world.nodes.remove(entity_id).is_some() {
      let mut nodes: Vec<Node> = world
        .nodes
        .values()
        .filter(|n| n.instance == instance)
        .cloned()
        .collect();
      drop(world);
      nodes.sort_by(|a, b| a.id.cmp(&b.id));
      self.emit(
        WsEventKind::NodesReplaced,
        serde_json::json!({ "instance": instance, "nodes": nodes }),
      );
      return true;
    }
    if world.storage.remove(entity_id).is_some() {
      let mut storage: Vec<Storage> = world
        .storage
        .values()
        .filter(|s| s.instance == instance)
        .cloned()
        .collect();
      drop(world);
      storage.sort_by(|a, b| a.id.cmp(&b.id));
      self.emit(
        WsEventKind::StorageReplaced,
        serde_json::json!({
          "instance": instance,
          "storage": storage,
        }),
      );
      return true;
    }
    false
  }

  /// Remove everything belonging to an instance. Used when the
  /// operator deletes it.
  pub fn prune_instance(&self, kind: InstanceKind, instance: &str) {
    let mut world = self.world.write().unwrap();
    world.nodes.retain(|_, n| n.instance != instance);
    world.guests.retain(|_, g| g.instance != instance);
    world.storage.retain(|_, s| s.instance != instance);
    world.backups.remove(instance);
    world.snapshots.remove(instance);
    world.zfs_pools.remove(instance);
    world.pbs.remove(instance);
    world.pmg.remove(instance);
    world.connection_health.remove(&health_key(kind, instance));
  }

  /// Copy-on-read of the full world, suitable for broadcast and the
  /// `/api/state` endpoint. Collections are sorted for stable
  /// serialization.
  pub fn snapshot(&self) -> WorldSnapshot {
    let world = self.world.read().unwrap();
    let mut nodes: Vec<Node> = world.nodes.values().cloned().collect();
    let mut guests: Vec<Guest> =
      world.guests.values().cloned().collect();
    let mut storage: Vec<Storage> =
      world.storage.values().cloned().collect();
    let mut backups: Vec<Backup> =
      world.backups.values().flatten().cloned().collect();
    let mut snapshots: Vec<Snapshot> =
      world.snapshots.values().flatten().cloned().collect();
    let mut zfs_pools: Vec<ZfsPool> =
      world.zfs_pools.values().flatten().cloned().collect();
    let mut pbs: Vec<PbsSummary> =
      world.pbs.values().cloned().collect();
    let mut pmg: Vec<PmgSummary> =
      world.pmg.values().cloned().collect();
    let mut docker_hosts: Vec<DockerHost> =
      world.docker_hosts.values().cloned().collect();
    let connection_health = world.connection_health.clone();
    drop(world);

    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    guests.sort_by(|a, b| a.id.cmp(&b.id));
    storage.sort_by(|a, b| a.id.cmp(&b.id));
    backups.sort_by(|a, b| a.id.cmp(&b.id));
    snapshots.sort_by(|a, b| a.id.cmp(&b.id));
    zfs_pools.sort_by(|a, b| {
      (a.instance.as_str(), a.node.as_str(), a.name.as_str()).cmp(&(
        b.instance.as_str(),
        b.node.as_str(),
        b.name.as_str(),
      ))
    });
    pbs.sort_by(|a, b| a.instance.cmp(&b.instance));
    pmg.sort_by(|a, b| a.instance.cmp(&b.instance));
    docker_hosts.sort_by(|a, b| a.id.cmp(&b.id));

    let counters = Counters {
      nodes: nodes.len(),
      nodes_online: nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Online)
        .count(),
      guests: guests.len(),
      guests_running: guests
        .iter()
        .filter(|g| g.status == GuestStatus::Running)
        .count(),
      storage: storage.len(),
      docker_hosts: docker_hosts.len(),
      docker_containers: docker_hosts
        .iter()
        .map(|h| h.containers.len())
        .sum(),
    };

    WorldSnapshot {
      ts: vigil_timestamp(),
      counters,
      nodes,
      guests,
      storage,
      backups,
      snapshots,
      zfs_pools,
      pbs,
      pmg,
      docker_hosts,
      connection_health,
    }
  }
}

#[derive(Serialize, Debug, Clone)]
pub struct WorldSnapshot {
  pub ts: i64,
  pub counters: Counters,
  pub nodes: Vec<Node>,
  pub guests: Vec<Guest>,
  pub storage: Vec<Storage>,
  pub backups: Vec<Backup>,
  pub snapshots: Vec<Snapshot>,
  pub zfs_pools: Vec<ZfsPool>,
  pub pbs: Vec<PbsSummary>,
  pub pmg: Vec<PmgSummary>,
  pub docker_hosts: Vec<DockerHost>,
  pub connection_health: HashMap<String, ConnectionHealth>,
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct Counters {
  pub nodes: usize,
  pub nodes_online: usize,
  pub guests: usize,
  pub guests_running: usize,
  pub storage: usize,
  pub docker_hosts: usize,
  pub docker_containers: usize,
}

#[cfg(test)]
mod tests {
  use vigil_client::entities::ConnectionState;

  use super::*;

  fn node(instance: &str, name: &str) -> Node {
    Node {
      id: vigil_client::entities::ids::node_id(instance, name),
      name: name.to_string(),
      instance: instance.to_string(),
      status: NodeStatus::Online,
      ..Default::default()
    }
  }

  #[test]
  fn replace_swaps_only_the_instance_bucket() {
    let store = Store::default();
    store.replace_nodes("pve1", vec![node("pve1", "a")]);
    store.replace_nodes("pve2", vec![node("pve2", "b")]);
    // Replacing pve1 with a new set must not disturb pve2.
    store.replace_nodes("pve1", vec![node("pve1", "c")]);
    let snapshot = store.snapshot();
    let ids: Vec<&str> =
      snapshot.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["pve1-c", "pve2-b"]);
  }

  #[test]
  fn replace_is_idempotent_on_ids() {
    let store = Store::default();
    store.replace_nodes("pve1", vec![node("pve1", "a")]);
    store.replace_nodes("pve1", vec![node("pve1", "a")]);
    assert_eq!(store.snapshot().counters.nodes, 1);
  }

  #[test]
  fn connection_health_emits_only_on_change() {
    let store = Store::default();
    let mut rx = store.subscribe();
    let health = ConnectionHealth {
      state: ConnectionState::Online,
      ..Default::default()
    };
    store.set_connection_health(
      InstanceKind::Pve,
      "pve1",
      health.clone(),
    );
    store.set_connection_health(InstanceKind::Pve, "pve1", health);
    let first = rx.try_recv().unwrap();
    assert_eq!(first.kind, WsEventKind::ConnectionHealth);
    // The identical second write was suppressed.
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn prune_entity_removes_one_guest_and_reemits_bucket() {
    let store = Store::default();
    let guest = |vmid: u32| Guest {
      id: format!("pve1-a-{vmid}"),
      vmid,
      instance: "pve1".into(),
      node: "a".into(),
      ..Default::default()
    };
    store.replace_guests("pve1", vec![guest(100), guest(101)]);
    let mut rx = store.subscribe();
    assert!(store.prune_entity("pve1", "pve1-a-100"));
    let snapshot = store.snapshot();
    assert_eq!(snapshot.counters.guests, 1);
    assert_eq!(snapshot.guests[0].id, "pve1-a-101");
    let event = rx.try_recv().unwrap();
    assert_eq!(event.kind, WsEventKind::GuestsReplaced);
    // Unknown ids are a no-op.
    assert!(!store.prune_entity("pve1", "pve1-a-100"));
  }

  #[test]
  fn prune_instance_clears_every_bucket() {
    let store = Store::default();
    store.replace_nodes("pve1", vec![node("pve1", "a")]);
    store.replace_backups("pve1", vec![Backup::default()]);
    store.set_connection_health(
      InstanceKind::Pve,
      "pve1",
      ConnectionHealth::default(),
    );
    store.prune_instance(InstanceKind::Pve, "pve1");
    let snapshot = store.snapshot();
    assert!(snapshot.nodes.is_empty());
    assert!(snapshot.backups.is_empty());
    assert!(snapshot.connection_health.is_empty());
  }
}
