//! The special alert families evaluated after each poll: metric
//! sweeps over nodes / guests / storage, connectivity and powered-off
//! conditions, backup and snapshot age, zfs health, PBS job failures
//! and PMG queue depth.

use vigil_client::entities::{
  InstanceKind,
  alert::{
    AlertKind, AlertLevel, METRIC_CPU, METRIC_DISK, METRIC_MEMORY,
    METRIC_PMG_QUEUE, METRIC_TEMPERATURE, ResourceFamily,
  },
  backup::{Backup, Snapshot},
  guest::{Guest, GuestStatus},
  node::{Node, NodeStatus},
  pbs::{PbsJobKind, PbsSummary},
  pmg::PmgSummary,
  storage::{Storage, ZfsPool},
};

use super::{AlertManager, Condition, Sample};

pub const METRIC_CONNECTIVITY: &str = "connectivity";
pub const METRIC_POWERED_OFF: &str = "powered_off";
pub const METRIC_BACKUP_AGE: &str = "backup_age";
pub const METRIC_SNAPSHOT_AGE: &str = "snapshot_age";
pub const METRIC_SNAPSHOT_SIZE: &str = "snapshot_size";
pub const METRIC_ZFS_HEALTH: &str = "zfs_health";
pub const METRIC_PBS_JOB: &str = "pbs_job";

const MS_PER_DAY: f64 = 86_400_000.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

impl AlertManager {
  pub fn check_nodes(&self, nodes: &[Node], now: i64) {
    for node in nodes {
      if node.status == NodeStatus::Offline {
        if !self.config().connectivity_disabled(&node.id) {
          self.set_condition(Condition {
            kind: AlertKind::Connectivity,
            level: AlertLevel::Critical,
            resource_id: &node.id,
            resource_name: &node.name,
            metric: METRIC_CONNECTIVITY,
            value: 0.0,
            trigger: 0.0,
            clear: 0.0,
            now,
          });
        }
        continue;
      }
      self.clear_condition(&node.id, METRIC_CONNECTIVITY, now);
      let sample = |metric, value| Sample {
        kind: InstanceKind::Pve,
        family: ResourceFamily::Node,
        resource_id: &node.id,
        resource_name: &node.name,
        metric,
        value,
        now,
      };
      self.observe(sample(METRIC_CPU, node.cpu * 100.0));
      if node.memory.usage >= 0.0 {
        self.observe(sample(METRIC_MEMORY, node.memory.usage));
      }
      if node.disk.usage >= 0.0 {
        self.observe(sample(METRIC_DISK, node.disk.usage));
      }
      if let Some(temperature) = node.temperature {
        self.observe(sample(METRIC_TEMPERATURE, temperature));
      }
    }
  }

  pub fn check_guests(&self, guests: &[Guest], now: i64) {
    for guest in guests {
      match guest.status {
        GuestStatus::Running => {
          self.clear_condition(&guest.id, METRIC_POWERED_OFF, now);
          self.clear_condition(&guest.id, METRIC_CONNECTIVITY, now);
          let sample = |metric, value| Sample {
            kind: InstanceKind::Pve,
            family: ResourceFamily::Guest,
            resource_id: &guest.id,
            resource_name: &guest.name,
            metric,
            value,
            now,
          };
          self.observe(sample(METRIC_CPU, guest.cpu * 100.0));
          if guest.memory.usage >= 0.0 {
            self.observe(sample(METRIC_MEMORY, guest.memory.usage));
          }
          if guest.disk.usage >= 0.0 {
            self.observe(sample(METRIC_DISK, guest.disk.usage));
          }
        }
        GuestStatus::Stopped | GuestStatus::Paused => {
          self.clear_condition(&guest.id, METRIC_CONNECTIVITY, now);
          if !self.config().connectivity_disabled(&guest.id) {
            let level = self.config().powered_off_severity(&guest.id);
            self.set_condition(Condition {
              kind: AlertKind::PoweredOff,
              level,
              resource_id: &guest.id,
              resource_name: &guest.name,
              metric: METRIC_POWERED_OFF,
              value: 0.0,
              trigger: 0.0,
              clear: 0.0,
              now,
            });
          }
        }
        GuestStatus::Unknown => {
          if !self.config().connectivity_disabled(&guest.id) {
            self.set_condition(Condition {
              kind: AlertKind::Connectivity,
              level: AlertLevel::Warning,
              resource_id: &guest.id,
              resource_name: &guest.name,
              metric: METRIC_CONNECTIVITY,
              value: 0.0,
              trigger: 0.0,
              clear: 0.0,
              now,
            });
          }
        }
      }
    }
  }

  pub fn check_storage(&self, storage: &[Storage], now: i64) {
    for entry in storage {
      if entry.usage < 0.0 {
        continue;
      }
      self.observe(Sample {
        kind: InstanceKind::Pve,
        family: ResourceFamily::Storage,
        resource_id: &entry.id,
        resource_name: &entry.name,
        metric: METRIC_DISK,
        value: entry.usage,
        now,
      });
    }
  }

  /// Raise when a guest's newest backup falls behind the configured
  /// age policy. Guests without any backup are skipped: there is no
  /// age to measure.
  pub fn check_backup_age(
    &self,
    guests: &[Guest],
    backups: &[Backup],
    now: i64,
  ) {
    let defaults = self.config().backup_defaults;
    if !defaults.enabled {
      return;
    }
    for guest in guests {
      let newest = backups
        .iter()
        .filter(|b| b.vmid == guest.vmid)
        .map(|b| b.time)
        .max();
      let Some(newest) = newest else {
        continue;
      };
      let age_days = (now as f64 - newest as f64 * 1000.0) / MS_PER_DAY;
      self.age_condition(
        AlertKind::BackupAge,
        METRIC_BACKUP_AGE,
        &guest.id,
        &guest.name,
        age_days,
        defaults.warning_days as f64,
        defaults.critical_days as f64,
        now,
      );
    }
  }

  /// Snapshot age per guest (oldest snapshot), with size escalation
  /// once any snapshot crosses `critical_size_gib`.
  pub fn check_snapshot_age(
    &self,
    guests: &[Guest],
    snapshots: &[Snapshot],
    now: i64,
  ) {
    let defaults = self.config().snapshot_defaults;
    if !defaults.enabled {
      return;
    }
    for guest in guests {
      let oldest = snapshots
        .iter()
        .filter(|s| s.vmid == guest.vmid)
        .map(|s| s.time)
        .min();
      let Some(oldest) = oldest else {
        self.clear_condition(&guest.id, METRIC_SNAPSHOT_AGE, now);
        self.clear_condition(&guest.id, METRIC_SNAPSHOT_SIZE, now);
        continue;
      };
      let age_days = (now as f64 - oldest as f64 * 1000.0) / MS_PER_DAY;
      self.age_condition(
        AlertKind::SnapshotAge,
        METRIC_SNAPSHOT_AGE,
        &guest.id,
        &guest.name,
        age_days,
        defaults.warning_days as f64,
        defaults.critical_days as f64,
        now,
      );

      if defaults.critical_size_gib == 0 {
        continue;
      }
      let largest_gib = snapshots
        .iter()
        .filter(|s| s.vmid == guest.vmid)
        .filter_map(|s| s.size_bytes)
        .max()
        .map(|bytes| bytes as f64 / GIB)
        .unwrap_or(0.0);
      if largest_gib >= defaults.critical_size_gib as f64 {
        self.set_condition(Condition {
          kind: AlertKind::SnapshotSize,
          level: AlertLevel::Critical,
          resource_id: &guest.id,
          resource_name: &guest.name,
          metric: METRIC_SNAPSHOT_SIZE,
          value: largest_gib,
          trigger: defaults.critical_size_gib as f64,
          clear: defaults.critical_size_gib as f64,
          now,
        });
      } else {
        self.clear_condition(&guest.id, METRIC_SNAPSHOT_SIZE, now);
      }
    }
  }

  #[allow(clippy::too_many_arguments)]
  fn age_condition(
    &self,
    kind: AlertKind,
    metric: &str,
    resource_id: &str,
    resource_name: &str,
    age_days: f64,
    warning_days: f64,
    critical_days: f64,
    now: i64,
  ) {
    if age_days >= critical_days {
      self.set_condition(Condition {
        kind,
        level: AlertLevel::Critical,
        resource_id,
        resource_name,
        metric,
        value: age_days,
        trigger: critical_days,
        clear: critical_days,
        now,
      });
    } else if age_days >= warning_days {
      self.set_condition(Condition {
        kind,
        level: AlertLevel::Warning,
        resource_id,
        resource_name,
        metric,
        value: age_days,
        trigger: warning_days,
        clear: warning_days,
        now,
      });
    } else {
      self.clear_condition(resource_id, metric, now);
    }
  }

  pub fn check_zfs_pools(&self, pools: &[ZfsPool], now: i64) {
    for pool in pools {
      let resource_id = format!(
        "{}-{}-{}",
        pool.instance, pool.node, pool.name
      );
      if pool.is_healthy() {
        self.clear_condition(&resource_id, METRIC_ZFS_HEALTH, now);
        continue;
      }
      // FAULTED / UNAVAIL pools have lost redundancy or data;
      // anything else unhealthy is a warning.
      let level = if matches!(
        pool.health.to_ascii_uppercase().as_str(),
        "FAULTED" | "UNAVAIL" | "REMOVED"
      ) {
        AlertLevel::Critical
      } else {
        AlertLevel::Warning
      };
      self.set_condition(Condition {
        kind: AlertKind::ZfsHealth,
        level,
        resource_id: &resource_id,
        resource_name: &pool.name,
        metric: METRIC_ZFS_HEALTH,
        value: pool.errored_devices.len() as f64,
        trigger: 0.0,
        clear: 0.0,
        now,
      });
    }
  }

  /// Failed PBS jobs raise one alert per job id. Verify failures are
  /// critical: they mean backup integrity is unconfirmed.
  pub fn check_pbs_jobs(&self, summary: &PbsSummary, now: i64) {
    for job in &summary.jobs {
      let resource_id = format!("{}-{}", summary.instance, job.id);
      if job.last_run == 0 || job.last_run_ok {
        self.clear_condition(&resource_id, METRIC_PBS_JOB, now);
        continue;
      }
      let level = if job.kind == PbsJobKind::Verify {
        AlertLevel::Critical
      } else {
        AlertLevel::Warning
      };
      self.set_condition(Condition {
        kind: AlertKind::PbsJob,
        level,
        resource_id: &resource_id,
        resource_name: &job.id,
        metric: METRIC_PBS_JOB,
        value: 0.0,
        trigger: 0.0,
        clear: 0.0,
        now,
      });
    }
  }

  pub fn check_pmg_queues(&self, summary: &PmgSummary, now: i64) {
    self.observe(Sample {
      kind: InstanceKind::Pmg,
      family: ResourceFamily::Pmg,
      resource_id: &summary.instance,
      resource_name: &summary.instance,
      metric: METRIC_PMG_QUEUE,
      value: summary.queues.total() as f64,
      now,
    });
  }
}

#[cfg(test)]
mod tests {
  use tokio::sync::broadcast;
  use vigil_client::entities::{
    alert::{AgeDefaults, AlertsConfig},
    node::UsageStats,
  };

  use super::*;

  fn manager(config: AlertsConfig) -> AlertManager {
    let (events, _) = broadcast::channel(64);
    AlertManager::new(config, events)
  }

  fn guest(vmid: u32) -> Guest {
    Guest {
      id: format!("pve1-node-a-{vmid}"),
      vmid,
      name: format!("guest-{vmid}"),
      node: "node-a".into(),
      instance: "pve1".into(),
      status: GuestStatus::Running,
      ..Default::default()
    }
  }

  const DAY_SECS: i64 = 86_400;

  #[test]
  fn backup_age_raises_warning_then_critical() {
    let alerts = manager(AlertsConfig::default());
    let now_sec: i64 = 1_700_000_000;
    let now = now_sec * 1000;
    let guests = [guest(100)];
    // 10 days old: warning (defaults 7 / 14).
    let backups = [Backup {
      id: "b1".into(),
      instance: "pve1".into(),
      vmid: 100,
      time: now_sec - 10 * DAY_SECS,
      ..Default::default()
    }];
    alerts.check_backup_age(&guests, &backups, now);
    let active = alerts.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].level, AlertLevel::Warning);
    assert_eq!(active[0].trigger_threshold, 7.0);
    assert!((active[0].value - 10.0).abs() < 0.01);
    // 20 days old: escalates.
    let backups = [Backup {
      time: now_sec - 20 * DAY_SECS,
      ..backups[0].clone()
    }];
    alerts.check_backup_age(&guests, &backups, now);
    assert_eq!(alerts.active()[0].level, AlertLevel::Critical);
  }

  #[test]
  fn guest_without_backups_is_skipped() {
    let alerts = manager(AlertsConfig::default());
    alerts.check_backup_age(&[guest(100)], &[], 1_700_000_000_000);
    assert!(alerts.active().is_empty());
  }

  #[test]
  fn snapshot_age_and_size_escalation() {
    let mut config = AlertsConfig::default();
    config.snapshot_defaults = AgeDefaults {
      enabled: true,
      warning_days: 30,
      critical_days: 45,
      critical_size_gib: 10,
    };
    let alerts = manager(config);
    let now_sec: i64 = 1_700_000_000;
    let now = now_sec * 1000;
    let guests = [guest(100)];
    let snapshots = [Snapshot {
      id: "s1".into(),
      vmid: 100,
      instance: "pve1".into(),
      node: "node-a".into(),
      time: now_sec - 50 * DAY_SECS,
      name: "before-upgrade".into(),
      size_bytes: Some(20 * 1024 * 1024 * 1024),
      ..Default::default()
    }];
    alerts.check_snapshot_age(&guests, &snapshots, now);
    let active = alerts.active();
    assert_eq!(active.len(), 2);
    let age = active
      .iter()
      .find(|a| a.metric == METRIC_SNAPSHOT_AGE)
      .unwrap();
    assert_eq!(age.level, AlertLevel::Critical);
    let size = active
      .iter()
      .find(|a| a.metric == METRIC_SNAPSHOT_SIZE)
      .unwrap();
    assert_eq!(size.level, AlertLevel::Critical);
    assert!((size.value - 20.0).abs() < 0.01);
  }

  #[test]
  fn powered_off_severity_follows_override() {
    let mut config = AlertsConfig::default();
    config.overrides.insert(
      "pve1-node-a-100".into(),
      vigil_client::entities::alert::AlertOverride {
        powered_off_severity: Some(AlertLevel::Critical),
        ..Default::default()
      },
    );
    let alerts = manager(config);
    let mut stopped = guest(100);
    stopped.status = GuestStatus::Stopped;
    alerts.check_guests(&[stopped], 1000);
    let active = alerts.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].metric, METRIC_POWERED_OFF);
    assert_eq!(active[0].level, AlertLevel::Critical);
  }

  #[test]
  fn connectivity_respects_disable_override() {
    let mut config = AlertsConfig::default();
    config.overrides.insert(
      "pve1-node-a".into(),
      vigil_client::entities::alert::AlertOverride {
        disable_connectivity: true,
        ..Default::default()
      },
    );
    let alerts = manager(config);
    let node = Node {
      id: "pve1-node-a".into(),
      name: "node-a".into(),
      instance: "pve1".into(),
      status: NodeStatus::Offline,
      ..Default::default()
    };
    alerts.check_nodes(&[node], 1000);
    assert!(alerts.active().is_empty());
  }

  #[test]
  fn offline_node_raises_connectivity() {
    let alerts = manager(AlertsConfig::default());
    let node = Node {
      id: "pve1-node-a".into(),
      name: "node-a".into(),
      instance: "pve1".into(),
      status: NodeStatus::Offline,
      ..Default::default()
    };
    alerts.check_nodes(&[node.clone()], 1000);
    let active = alerts.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].kind, AlertKind::Connectivity);
    // Node returns: alert resolves.
    let node = Node { status: NodeStatus::Online, ..node };
    alerts.check_nodes(&[node], 2000);
    assert!(alerts.active().is_empty());
  }

  #[test]
  fn zfs_degraded_warns_faulted_is_critical() {
    let alerts = manager(AlertsConfig::default());
    let degraded = ZfsPool {
      name: "tank".into(),
      node: "node-a".into(),
      instance: "pve1".into(),
      health: "DEGRADED".into(),
      ..Default::default()
    };
    let faulted = ZfsPool {
      name: "dump".into(),
      health: "FAULTED".into(),
      ..degraded.clone()
    };
    alerts.check_zfs_pools(&[degraded, faulted], 1000);
    let active = alerts.active();
    assert_eq!(active.len(), 2);
    let by_name = |name: &str| {
      active.iter().find(|a| a.resource_name == name).unwrap()
    };
    assert_eq!(by_name("tank").level, AlertLevel::Warning);
    assert_eq!(by_name("dump").level, AlertLevel::Critical);
  }

  #[test]
  fn running_guest_memory_usage_is_observed() {
    let alerts = manager(AlertsConfig::default());
    let mut g = guest(100);
    g.memory = UsageStats::new(100, 96);
    // Dwell: two sweeps 6 seconds apart.
    alerts.check_guests(&[g.clone()], 0);
    alerts.check_guests(&[g], 6000);
    let active = alerts.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].metric, METRIC_MEMORY);
    // 96% >= crit trigger 95.
    assert_eq!(active[0].level, AlertLevel::Critical);
  }
}
