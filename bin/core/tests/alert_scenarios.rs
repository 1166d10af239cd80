//! End to end alerting scenarios: dampened threshold crossings,
//! per resource overrides and the backup / snapshot age families.

use indexmap::IndexMap;
use tokio::sync::broadcast;
use vigil_client::{
  entities::{
    InstanceKind,
    alert::{
      AlertLevel, AlertOverride, AlertsConfig, AgeDefaults,
      METRIC_CPU, METRIC_MEMORY, MetricThreshold, ResourceFamily,
    },
    backup::{Backup, Snapshot},
    guest::{Guest, GuestStatus},
  },
  ws::WsEventKind,
};
use vigil_core::alert::{
  AlertManager, METRIC_BACKUP_AGE, METRIC_SNAPSHOT_AGE,
  METRIC_SNAPSHOT_SIZE, Sample,
};

fn manager(config: AlertsConfig) -> AlertManager {
  let (events, _) = broadcast::channel(256);
  AlertManager::new(config, events)
}

fn guest_sample<'a>(
  metric: &'a str,
  value: f64,
  t_sec: f64,
) -> Sample<'a> {
  Sample {
    kind: InstanceKind::Pve,
    family: ResourceFamily::Guest,
    resource_id: "pve-pve1-100",
    resource_name: "guest-100",
    metric,
    value,
    now: (t_sec * 1000.0) as i64,
  }
}

#[test]
fn threshold_crossing_with_dampening() {
  let alerts = manager(AlertsConfig::default());
  for (value, t) in
    [(90.0, 0.0), (91.0, 2.0), (88.0, 4.0)]
  {
    alerts.observe(guest_sample(METRIC_CPU, value, t));
    assert!(alerts.active().is_empty(), "raised too early at t={t}");
  }
  alerts.observe(guest_sample(METRIC_CPU, 89.0, 5.1));
  let active = alerts.active();
  assert_eq!(active.len(), 1);
  assert_eq!(active[0].value, 89.0);
  assert_eq!(active[0].trigger_threshold, 80.0);
  assert_eq!(active[0].clear_threshold, 75.0);

  // Clearing needs the same dwell below the clear bound.
  alerts.observe(guest_sample(METRIC_CPU, 70.0, 10.0));
  assert_eq!(alerts.active().len(), 1);
  alerts.observe(guest_sample(METRIC_CPU, 70.0, 16.0));
  assert!(alerts.active().is_empty());
  let resolved = alerts.recently_resolved();
  assert_eq!(resolved.len(), 1);
  assert_eq!(resolved[0].resolved_at, 15_000);
}

#[test]
fn disabled_metric_produces_no_alerts() {
  let mut config = AlertsConfig::default();
  config.overrides.insert(
    "pve-pve1-100".to_string(),
    AlertOverride {
      thresholds: IndexMap::from([(
        METRIC_MEMORY.to_string(),
        MetricThreshold::warn_only(0.0, 0.0),
      )]),
      ..Default::default()
    },
  );
  let alerts = manager(config);
  // A minute of memory at 95%: nothing.
  for t in 0..12 {
    alerts.observe(guest_sample(
      METRIC_MEMORY,
      95.0,
      (t * 5) as f64,
    ));
  }
  assert!(alerts.active().is_empty());
  // CPU on the same guest still evaluates normally.
  alerts.observe(guest_sample(METRIC_CPU, 95.0, 0.0));
  alerts.observe(guest_sample(METRIC_CPU, 95.0, 6.0));
  let active = alerts.active();
  assert_eq!(active.len(), 1);
  assert_eq!(active[0].metric, METRIC_CPU);
}

#[test]
fn backup_age_and_snapshot_escalation() {
  let mut config = AlertsConfig::default();
  config.backup_defaults = AgeDefaults {
    enabled: true,
    warning_days: 7,
    critical_days: 14,
    critical_size_gib: 0,
  };
  config.snapshot_defaults = AgeDefaults {
    enabled: true,
    warning_days: 30,
    critical_days: 45,
    critical_size_gib: 8,
  };
  let alerts = manager(config);

  let now_sec: i64 = 1_700_000_000;
  let now = now_sec * 1000;
  let day = 86_400;
  let guest = Guest {
    id: "pve-pve1-100".into(),
    vmid: 100,
    name: "guest-100".into(),
    node: "pve1".into(),
    instance: "pve".into(),
    status: GuestStatus::Running,
    ..Default::default()
  };
  let backups = [Backup {
    id: "b".into(),
    instance: "pve".into(),
    vmid: 100,
    time: now_sec - 10 * day,
    ..Default::default()
  }];
  alerts.check_backup_age(
    std::slice::from_ref(&guest),
    &backups,
    now,
  );
  let backup_alert = alerts
    .active_for("pve-pve1-100", METRIC_BACKUP_AGE)
    .expect("backup age alert");
  assert_eq!(backup_alert.level, AlertLevel::Warning);
  assert_eq!(backup_alert.trigger_threshold, 7.0);
  assert!((backup_alert.value - 10.0).abs() < 0.05);

  let snapshots = [Snapshot {
    id: "s".into(),
    vmid: 100,
    node: "pve1".into(),
    instance: "pve".into(),
    time: now_sec - 46 * day,
    name: "pre-upgrade".into(),
    size_bytes: Some(16 * 1024 * 1024 * 1024),
    ..Default::default()
  }];
  alerts.check_snapshot_age(
    std::slice::from_ref(&guest),
    &snapshots,
    now,
  );
  let age = alerts
    .active_for("pve-pve1-100", METRIC_SNAPSHOT_AGE)
    .expect("snapshot age alert");
  assert_eq!(age.level, AlertLevel::Critical);
  let size = alerts
    .active_for("pve-pve1-100", METRIC_SNAPSHOT_SIZE)
    .expect("snapshot size alert");
  assert_eq!(size.level, AlertLevel::Critical);
}

#[test]
fn alert_events_stream_to_subscribers() {
  let (events, mut rx) = broadcast::channel(256);
  let alerts = AlertManager::new(AlertsConfig::default(), events);
  alerts.observe(guest_sample(METRIC_CPU, 90.0, 0.0));
  alerts.observe(guest_sample(METRIC_CPU, 90.0, 5.0));
  let event = rx.try_recv().expect("raised event");
  assert_eq!(event.kind, WsEventKind::AlertRaised);
  // Resolve and expect the resolved event (after the raise).
  alerts.observe(guest_sample(METRIC_CPU, 50.0, 10.0));
  alerts.observe(guest_sample(METRIC_CPU, 50.0, 16.0));
  let event = rx.try_recv().expect("resolved event");
  assert_eq!(event.kind, WsEventKind::AlertResolved);
}
