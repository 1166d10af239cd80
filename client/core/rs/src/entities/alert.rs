use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::InstanceKind;

/// Metric names with factory default thresholds.
pub const METRIC_CPU: &str = "cpu";
pub const METRIC_MEMORY: &str = "memory";
pub const METRIC_DISK: &str = "disk";
pub const METRIC_TEMPERATURE: &str = "temperature";
pub const METRIC_PMG_QUEUE: &str = "mail_queue";

#[derive(
  Serialize,
  Deserialize,
  Debug,
  Display,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertLevel {
  #[default]
  Warning,
  Critical,
}

/// The alert families Vigil raises.
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
pub enum AlertKind {
  #[default]
  Metric,
  Connectivity,
  PoweredOff,
  BackupAge,
  SnapshotAge,
  SnapshotSize,
  ZfsHealth,
  PbsJob,
  PmgQueue,
}

/// An active alert. At most one exists per (resource, metric).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Alert {
  /// `{resource_id}-{metric}`, see [super::ids::alert_id].
  pub id: String,
  #[serde(rename = "type")]
  pub kind: AlertKind,
  pub level: AlertLevel,
  pub resource_id: String,
  pub resource_name: String,
  pub metric: String,
  /// The observed value when last evaluated.
  pub value: f64,
  pub trigger_threshold: f64,
  pub clear_threshold: f64,
  /// When the alert first raised (ms).
  pub start_time: i64,
  #[serde(default)]
  pub acknowledged: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_notified: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ResolvedAlert {
  #[serde(flatten)]
  pub alert: Alert,
  pub resolved_at: i64,
}

/// A `(trigger, clear)` pair with `clear <= trigger`.
/// `trigger == 0` disables the metric.
#[derive(
  Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default,
)]
pub struct HysteresisThreshold {
  pub trigger: f64,
  pub clear: f64,
}

impl HysteresisThreshold {
  pub fn new(trigger: f64, clear: f64) -> HysteresisThreshold {
    HysteresisThreshold { trigger, clear: clear.min(trigger) }
  }

  pub fn disabled(&self) -> bool {
    self.trigger == 0.0
  }
}

/// Warn and optional crit pair for one metric, with optional
/// per-metric dwell override.
#[derive(
  Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default,
)]
pub struct MetricThreshold {
  pub warn: HysteresisThreshold,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub crit: Option<HysteresisThreshold>,
  /// Seconds a value must dwell past a bound before the state
  /// changes. Inherits `time_thresholds[kind]` when unset.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub time_threshold_sec: Option<u64>,
}

impl MetricThreshold {
  pub fn pair(
    warn_trigger: f64,
    warn_clear: f64,
    crit_trigger: f64,
    crit_clear: f64,
  ) -> MetricThreshold {
    MetricThreshold {
      warn: HysteresisThreshold::new(warn_trigger, warn_clear),
      crit: Some(HysteresisThreshold::new(crit_trigger, crit_clear)),
      time_threshold_sec: None,
    }
  }

  pub fn warn_only(trigger: f64, clear: f64) -> MetricThreshold {
    MetricThreshold {
      warn: HysteresisThreshold::new(trigger, clear),
      crit: None,
      time_threshold_sec: None,
    }
  }

  pub fn disabled(&self) -> bool {
    self.warn.disabled()
      && self.crit.map(|c| c.disabled()).unwrap_or(true)
  }
}

/// Per resource overrides, keyed by resource id in
/// [AlertsConfig::overrides].
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AlertOverride {
  /// Threshold overrides by metric name. A `warn.trigger` of 0
  /// disables the metric for this resource.
  #[serde(default)]
  pub thresholds: IndexMap<String, MetricThreshold>,
  /// Drop all alerts for this resource.
  #[serde(default)]
  pub disabled: bool,
  /// Drop connectivity / powered-off alerts only.
  #[serde(default)]
  pub disable_connectivity: bool,
  /// Severity of the powered-off alert for this resource.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub powered_off_severity: Option<AlertLevel>,
}

/// Backup and snapshot age policies.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AgeDefaults {
  pub enabled: bool,
  pub warning_days: u64,
  pub critical_days: u64,
  /// Snapshot only: escalate to critical once a snapshot exceeds
  /// this size. 0 disables size escalation.
  #[serde(default)]
  pub critical_size_gib: u64,
}

impl Default for AgeDefaults {
  fn default() -> Self {
    AgeDefaults {
      enabled: true,
      warning_days: 7,
      critical_days: 14,
      critical_size_gib: 0,
    }
  }
}

/// The alert configuration consumed from `alerts.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlertsConfig {
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  /// Factory defaults by metric, per resource family.
  #[serde(default = "node_factory_defaults")]
  pub node_defaults: IndexMap<String, MetricThreshold>,
  #[serde(default = "guest_factory_defaults")]
  pub guest_defaults: IndexMap<String, MetricThreshold>,
  #[serde(default = "storage_factory_defaults")]
  pub storage_defaults: IndexMap<String, MetricThreshold>,
  #[serde(default = "pmg_factory_defaults")]
  pub pmg_defaults: IndexMap<String, MetricThreshold>,
  /// Default dwell seconds per instance kind.
  #[serde(default = "default_time_thresholds")]
  pub time_thresholds: IndexMap<InstanceKind, u64>,
  /// Window after a resolve during which the same alert will not
  /// re-raise unless the value moves `minimum_delta` past trigger.
  #[serde(default = "default_suppression_window_sec")]
  pub suppression_window_sec: u64,
  #[serde(default = "default_minimum_delta")]
  pub minimum_delta: f64,
  #[serde(default)]
  pub backup_defaults: AgeDefaults,
  #[serde(default = "snapshot_age_defaults")]
  pub snapshot_defaults: AgeDefaults,
  /// Per resource overrides keyed by resource id.
  #[serde(default)]
  pub overrides: IndexMap<String, AlertOverride>,
}

impl Default for AlertsConfig {
  fn default() -> Self {
    AlertsConfig {
      enabled: default_enabled(),
      node_defaults: node_factory_defaults(),
      guest_defaults: guest_factory_defaults(),
      storage_defaults: storage_factory_defaults(),
      pmg_defaults: pmg_factory_defaults(),
      time_thresholds: default_time_thresholds(),
      suppression_window_sec: default_suppression_window_sec(),
      minimum_delta: default_minimum_delta(),
      backup_defaults: AgeDefaults::default(),
      snapshot_defaults: snapshot_age_defaults(),
      overrides: IndexMap::new(),
    }
  }
}

fn default_enabled() -> bool {
  true
}

fn node_factory_defaults() -> IndexMap<String, MetricThreshold> {
  IndexMap::from([
    (METRIC_CPU.to_string(), MetricThreshold::pair(80.0, 75.0, 95.0, 90.0)),
    (METRIC_MEMORY.to_string(), MetricThreshold::pair(85.0, 80.0, 95.0, 90.0)),
    (METRIC_DISK.to_string(), MetricThreshold::pair(85.0, 80.0, 95.0, 90.0)),
    (METRIC_TEMPERATURE.to_string(), MetricThreshold::warn_only(80.0, 75.0)),
  ])
}

fn guest_factory_defaults() -> IndexMap<String, MetricThreshold> {
  IndexMap::from([
    (METRIC_CPU.to_string(), MetricThreshold::pair(80.0, 75.0, 95.0, 90.0)),
    (METRIC_MEMORY.to_string(), MetricThreshold::pair(85.0, 80.0, 95.0, 90.0)),
    (METRIC_DISK.to_string(), MetricThreshold::pair(85.0, 80.0, 95.0, 90.0)),
  ])
}

fn storage_factory_defaults() -> IndexMap<String, MetricThreshold> {
  IndexMap::from([(
    METRIC_DISK.to_string(),
    MetricThreshold::pair(85.0, 80.0, 95.0, 90.0),
  )])
}

fn pmg_factory_defaults() -> IndexMap<String, MetricThreshold> {
  IndexMap::from([(
    METRIC_PMG_QUEUE.to_string(),
    MetricThreshold::pair(100.0, 80.0, 500.0, 400.0),
  )])
}

fn default_time_thresholds() -> IndexMap<InstanceKind, u64> {
  IndexMap::from([
    (InstanceKind::Pve, 5),
    (InstanceKind::Pbs, 5),
    (InstanceKind::Pmg, 5),
    (InstanceKind::DockerAgent, 5),
  ])
}

fn default_suppression_window_sec() -> u64 {
  300
}

fn default_minimum_delta() -> f64 {
  2.0
}

fn snapshot_age_defaults() -> AgeDefaults {
  AgeDefaults {
    enabled: true,
    warning_days: 30,
    critical_days: 45,
    critical_size_gib: 0,
  }
}

/// The resource families thresholds resolve against.
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
pub enum ResourceFamily {
  Node,
  #[default]
  Guest,
  Storage,
  Pmg,
}

/// A fully resolved threshold for one (resource, metric).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedThreshold {
  pub warn: HysteresisThreshold,
  pub crit: Option<HysteresisThreshold>,
  pub time_threshold_sec: u64,
}

impl AlertsConfig {
  /// Effective threshold: per-resource override, then family
  /// default. Returns None when the metric is disabled or unknown.
  pub fn resolve(
    &self,
    kind: InstanceKind,
    family: ResourceFamily,
    resource_id: &str,
    metric: &str,
  ) -> Option<ResolvedThreshold> {
    let threshold = self
      .overrides
      .get(resource_id)
      .and_then(|o| o.thresholds.get(metric))
      .or_else(|| self.family_defaults(family).get(metric))?;
    if threshold.disabled() {
      return None;
    }
    let dampening = threshold
      .time_threshold_sec
      .unwrap_or_else(|| self.time_threshold(kind));
    Some(ResolvedThreshold {
      warn: threshold.warn,
      crit: threshold.crit.filter(|c| !c.disabled()),
      time_threshold_sec: dampening,
    })
  }

  pub fn family_defaults(
    &self,
    family: ResourceFamily,
  ) -> &IndexMap<String, MetricThreshold> {
    match family {
      ResourceFamily::Node => &self.node_defaults,
      ResourceFamily::Guest => &self.guest_defaults,
      ResourceFamily::Storage => &self.storage_defaults,
      ResourceFamily::Pmg => &self.pmg_defaults,
    }
  }

  pub fn time_threshold(&self, kind: InstanceKind) -> u64 {
    self.time_thresholds.get(&kind).copied().unwrap_or(5)
  }

  pub fn override_for(
    &self,
    resource_id: &str,
  ) -> Option<&AlertOverride> {
    self.overrides.get(resource_id)
  }

  pub fn resource_disabled(&self, resource_id: &str) -> bool {
    self
      .override_for(resource_id)
      .map(|o| o.disabled)
      .unwrap_or(false)
  }

  pub fn connectivity_disabled(&self, resource_id: &str) -> bool {
    self
      .override_for(resource_id)
      .map(|o| o.disabled || o.disable_connectivity)
      .unwrap_or(false)
  }

  pub fn powered_off_severity(&self, resource_id: &str) -> AlertLevel {
    self
      .override_for(resource_id)
      .and_then(|o| o.powered_off_severity)
      .unwrap_or(AlertLevel::Warning)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn override_takes_precedence_over_family_default() {
    let mut config = AlertsConfig::default();
    config.overrides.insert(
      "pve1-node-a-100".to_string(),
      AlertOverride {
        thresholds: IndexMap::from([(
          METRIC_CPU.to_string(),
          MetricThreshold::warn_only(50.0, 45.0),
        )]),
        ..Default::default()
      },
    );
    let resolved = config
      .resolve(
        InstanceKind::Pve,
        ResourceFamily::Guest,
        "pve1-node-a-100",
        METRIC_CPU,
      )
      .unwrap();
    assert_eq!(resolved.warn.trigger, 50.0);
    assert!(resolved.crit.is_none());
    // Another resource still sees the factory default.
    let default = config
      .resolve(
        InstanceKind::Pve,
        ResourceFamily::Guest,
        "pve1-node-a-101",
        METRIC_CPU,
      )
      .unwrap();
    assert_eq!(default.warn.trigger, 80.0);
  }

  #[test]
  fn zero_trigger_disables_metric() {
    let mut config = AlertsConfig::default();
    config.overrides.insert(
      "pve1-node-a-100".to_string(),
      AlertOverride {
        thresholds: IndexMap::from([(
          METRIC_MEMORY.to_string(),
          MetricThreshold::warn_only(0.0, 0.0),
        )]),
        ..Default::default()
      },
    );
    assert!(
      config
        .resolve(
          InstanceKind::Pve,
          ResourceFamily::Guest,
          "pve1-node-a-100",
          METRIC_MEMORY,
        )
        .is_none()
    );
    // cpu unaffected
    assert!(
      config
        .resolve(
          InstanceKind::Pve,
          ResourceFamily::Guest,
          "pve1-node-a-100",
          METRIC_CPU,
        )
        .is_some()
    );
  }

  #[test]
  fn dampening_inherits_kind_default() {
    let config = AlertsConfig::default();
    let resolved = config
      .resolve(
        InstanceKind::Pve,
        ResourceFamily::Node,
        "pve1-node-a",
        METRIC_CPU,
      )
      .unwrap();
    assert_eq!(resolved.time_threshold_sec, 5);
  }

  #[test]
  fn hysteresis_clear_clamped_to_trigger() {
    let threshold = HysteresisThreshold::new(80.0, 90.0);
    assert_eq!(threshold.clear, 80.0);
  }
}
