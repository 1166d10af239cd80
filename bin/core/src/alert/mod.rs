//! The alert manager.
//!
//! Turns metric samples into discrete raise / escalate / deescalate /
//! resolve events governed by hysteresis thresholds and time
//! dampening. Sampling state lives in per-(resource, metric) records
//! inside a sharded map, so evaluations for different resources never
//! contend on one lock.

use std::collections::VecDeque;
use std::sync::Mutex;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::broadcast;
use vigil_client::{
  entities::{
    InstanceKind,
    alert::{
      Alert, AlertKind, AlertLevel, AlertsConfig, ResolvedAlert,
      ResolvedThreshold, ResourceFamily,
    },
    ids::alert_id,
  },
  ws::{WsEvent, WsEventKind},
};

mod checks;

pub use checks::*;

/// Resolved alerts kept for the `/api/alerts` endpoint.
const RESOLVED_RETENTION: usize = 200;

/// A threshold-governed metric sample.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
  pub kind: InstanceKind,
  pub family: ResourceFamily,
  pub resource_id: &'a str,
  pub resource_name: &'a str,
  pub metric: &'a str,
  pub value: f64,
  /// Sample timestamp (ms).
  pub now: i64,
}

/// A directly-evaluated condition (connectivity, backup age, zfs
/// health, ...). These families skip dwell tracking: the underlying
/// facts move slowly and are already debounced by the poll cadence.
#[derive(Debug, Clone)]
pub struct Condition<'a> {
  pub kind: AlertKind,
  pub level: AlertLevel,
  pub resource_id: &'a str,
  pub resource_name: &'a str,
  pub metric: &'a str,
  pub value: f64,
  pub trigger: f64,
  pub clear: f64,
  pub now: i64,
}

#[derive(Default)]
struct AlertRecord {
  first_above_warn: Option<i64>,
  first_above_crit: Option<i64>,
  first_below_clear: Option<i64>,
  first_below_crit_clear: Option<i64>,
  active: Option<Alert>,
  /// `(resolved_at, trigger)` of the last resolve, for suppression.
  last_resolved: Option<(i64, f64)>,
}

pub struct AlertManager {
  config: ArcSwap<AlertsConfig>,
  records: DashMap<String, AlertRecord>,
  resolved: Mutex<VecDeque<ResolvedAlert>>,
  events: broadcast::Sender<WsEvent>,
}

impl AlertManager {
  pub fn new(
    config: AlertsConfig,
    events: broadcast::Sender<WsEvent>,
  ) -> AlertManager {
    AlertManager {
      config: ArcSwap::from_pointee(config),
      records: DashMap::new(),
      resolved: Mutex::new(VecDeque::new()),
      events,
    }
  }

  pub fn config(&self) -> arc_swap::Guard<std::sync::Arc<AlertsConfig>> {
    self.config.load()
  }

  /// Swap in a new configuration (ConfigChange event).
  pub fn update_config(&self, config: AlertsConfig) {
    self.config.store(std::sync::Arc::new(config));
  }

  /// Evaluate one sample. Errors are logged and never interrupt the
  /// caller's sweep.
  pub fn observe(&self, sample: Sample<'_>) {
    if let Err(e) = self.observe_inner(&sample) {
      tracing::warn!(
        resource = sample.resource_id,
        metric = sample.metric,
        "alert evaluation failed | {e:#}"
      );
    }
  }

  fn observe_inner(&self, s: &Sample<'_>) -> anyhow::Result<()> {
    let config = self.config.load();
    if !config.enabled {
      return Ok(());
    }
    let id = alert_id(s.resource_id, s.metric);
    if config.resource_disabled(s.resource_id) {
      self.drop_active(&id, s.now);
      return Ok(());
    }
    let Some(threshold) =
      config.resolve(s.kind, s.family, s.resource_id, s.metric)
    else {
      // Metric disabled: ignore the sample, retire any stale alert.
      self.drop_active(&id, s.now);
      return Ok(());
    };
    if !s.value.is_finite() {
      anyhow::bail!("non-finite sample value {}", s.value);
    }

    let dampening = (threshold.time_threshold_sec * 1000) as i64;
    let mut record = self.records.entry(id.clone()).or_default();
    track_dwell(&mut record, &threshold, s.value, s.now);

    let outcome = if record.active.is_some() {
      evaluate_active(&mut record, &threshold, s.value, dampening, s.now)
    } else {
      evaluate_candidate(
        &mut record, &config, &threshold, s, dampening,
      )
    };
    drop(record);

    match outcome {
      Outcome::None => {}
      Outcome::Raised(alert) => self.emit_alert(
        WsEventKind::AlertRaised,
        &alert,
        s.now,
      ),
      Outcome::Escalated(alert) => {
        self.emit_alert(WsEventKind::AlertEscalated, &alert, s.now)
      }
      Outcome::Deescalated(alert) => {
        self.emit_alert(WsEventKind::AlertDeescalated, &alert, s.now)
      }
      Outcome::Resolved(resolved) => self.push_resolved(resolved),
    }
    Ok(())
  }

  /// Raise or refresh a directly-evaluated condition.
  pub fn set_condition(&self, c: Condition<'_>) {
    let config = self.config.load();
    if !config.enabled || config.resource_disabled(c.resource_id) {
      return;
    }
    let id = alert_id(c.resource_id, c.metric);
    let mut record = self.records.entry(id.clone()).or_default();
    match &mut record.active {
      None => {
        let alert = Alert {
          id: id.clone(),
          kind: c.kind,
          level: c.level,
          resource_id: c.resource_id.to_string(),
          resource_name: c.resource_name.to_string(),
          metric: c.metric.to_string(),
          value: c.value,
          trigger_threshold: c.trigger,
          clear_threshold: c.clear,
          start_time: c.now,
          acknowledged: false,
          last_notified: None,
        };
        record.active = Some(alert.clone());
        drop(record);
        self.emit_alert(WsEventKind::AlertRaised, &alert, c.now);
      }
      Some(active) => {
        active.value = c.value;
        if active.level == c.level {
          return;
        }
        let escalating = c.level > active.level;
        active.level = c.level;
        let alert = active.clone();
        drop(record);
        let kind = if escalating {
          WsEventKind::AlertEscalated
        } else {
          WsEventKind::AlertDeescalated
        };
        self.emit_alert(kind, &alert, c.now);
      }
    }
  }

  /// Resolve a directly-evaluated condition if it is active.
  pub fn clear_condition(
    &self,
    resource_id: &str,
    metric: &str,
    now: i64,
  ) {
    let id = alert_id(resource_id, metric);
    let resolved = {
      let Some(mut record) = self.records.get_mut(&id) else {
        return;
      };
      match record.active.take() {
        Some(alert) => {
          record.last_resolved =
            Some((now, alert.trigger_threshold));
          Some(ResolvedAlert { alert, resolved_at: now })
        }
        None => None,
      }
    };
    if let Some(resolved) = resolved {
      self.push_resolved(resolved);
    }
  }

  /// Retire an alert whose metric or resource got disabled.
  fn drop_active(&self, id: &str, now: i64) {
    let resolved = {
      let Some(mut record) = self.records.get_mut(id) else {
        return;
      };
      record.first_above_warn = None;
      record.first_above_crit = None;
      record.first_below_clear = None;
      record.first_below_crit_clear = None;
      record
        .active
        .take()
        .map(|alert| ResolvedAlert { alert, resolved_at: now })
    };
    if let Some(resolved) = resolved {
      self.push_resolved(resolved);
    }
  }

  /// Operator-initiated resolve, bypassing hysteresis. The
  /// suppression window still applies to the next raise.
  pub fn resolve_manual(
    &self,
    alert_id: &str,
    now: i64,
  ) -> anyhow::Result<ResolvedAlert> {
    let mut record =
      self.records.get_mut(alert_id).ok_or_else(|| {
        anyhow::anyhow!("no alert '{alert_id}'")
      })?;
    let alert = record.active.take().ok_or_else(|| {
      anyhow::anyhow!("alert '{alert_id}' is not active")
    })?;
    record.last_resolved = Some((now, alert.trigger_threshold));
    record.first_below_clear = None;
    record.first_below_crit_clear = None;
    drop(record);
    let resolved = ResolvedAlert { alert, resolved_at: now };
    self.push_resolved(resolved.clone());
    Ok(resolved)
  }

  pub fn acknowledge(&self, alert_id: &str) -> anyhow::Result<Alert> {
    let mut record = self
      .records
      .get_mut(alert_id)
      .ok_or_else(|| anyhow::anyhow!("no alert '{alert_id}'"))?;
    let active = record
      .active
      .as_mut()
      .ok_or_else(|| anyhow::anyhow!("alert '{alert_id}' is not active"))?;
    active.acknowledged = true;
    Ok(active.clone())
  }

  pub fn active(&self) -> Vec<Alert> {
    let mut alerts: Vec<Alert> = self
      .records
      .iter()
      .filter_map(|r| r.active.clone())
      .collect();
    alerts.sort_by(|a, b| a.id.cmp(&b.id));
    alerts
  }

  pub fn active_for(&self, resource_id: &str, metric: &str) -> Option<Alert> {
    self
      .records
      .get(&alert_id(resource_id, metric))
      .and_then(|r| r.active.clone())
  }

  pub fn recently_resolved(&self) -> Vec<ResolvedAlert> {
    self.resolved.lock().unwrap().iter().cloned().collect()
  }

  fn push_resolved(&self, resolved: ResolvedAlert) {
    self.emit_alert(
      WsEventKind::AlertResolved,
      &resolved.alert,
      resolved.resolved_at,
    );
    let mut ring = self.resolved.lock().unwrap();
    ring.push_front(resolved);
    ring.truncate(RESOLVED_RETENTION);
  }

  fn emit_alert(&self, kind: WsEventKind, alert: &Alert, now: i64) {
    let payload = serde_json::json!({
      "alert": alert,
      "duration_ms": (now - alert.start_time).max(0),
    });
    match WsEvent::new(kind, payload) {
      Ok(event) => {
        let _ = self.events.send(event);
      }
      Err(e) => {
        tracing::error!("failed to serialize {kind} event | {e:#}")
      }
    }
  }
}

enum Outcome {
  None,
  Raised(Alert),
  Escalated(Alert),
  Deescalated(Alert),
  Resolved(ResolvedAlert),
}

/// Keep the continuous-dwell markers current for this sample.
fn track_dwell(
  record: &mut AlertRecord,
  threshold: &ResolvedThreshold,
  value: f64,
  now: i64,
) {
  if value >= threshold.warn.trigger {
    record.first_above_warn.get_or_insert(now);
  } else {
    record.first_above_warn = None;
  }
  match threshold.crit {
    Some(crit) if value >= crit.trigger => {
      record.first_above_crit.get_or_insert(now);
    }
    _ => record.first_above_crit = None,
  }
  if value <= threshold.warn.clear {
    record.first_below_clear.get_or_insert(now);
  } else {
    record.first_below_clear = None;
  }
  match threshold.crit {
    Some(crit) if value <= crit.clear => {
      record.first_below_crit_clear.get_or_insert(now);
    }
    _ => record.first_below_crit_clear = None,
  }
}

fn dwell_elapsed(first: Option<i64>, dampening: i64, now: i64) -> bool {
  matches!(first, Some(first) if now - first >= dampening)
}

fn evaluate_candidate(
  record: &mut AlertRecord,
  config: &AlertsConfig,
  threshold: &ResolvedThreshold,
  s: &Sample<'_>,
  dampening: i64,
) -> Outcome {
  let (level, pair) = if dwell_elapsed(
    record.first_above_crit,
    dampening,
    s.now,
  ) {
    (AlertLevel::Critical, threshold.crit.unwrap_or(threshold.warn))
  } else if dwell_elapsed(record.first_above_warn, dampening, s.now) {
    (AlertLevel::Warning, threshold.warn)
  } else {
    return Outcome::None;
  };

  // Suppression: a freshly resolved alert only re-raises inside the
  // window if the value moved minimum_delta past the trigger.
  if let Some((resolved_at, trigger)) = record.last_resolved
    && s.now - resolved_at < (config.suppression_window_sec * 1000) as i64
    && s.value < trigger + config.minimum_delta
  {
    return Outcome::None;
  }

  let alert = Alert {
    id: alert_id(s.resource_id, s.metric),
    kind: AlertKind::Metric,
    level,
    resource_id: s.resource_id.to_string(),
    resource_name: s.resource_name.to_string(),
    metric: s.metric.to_string(),
    value: s.value,
    trigger_threshold: pair.trigger,
    clear_threshold: pair.clear,
    start_time: s.now,
    acknowledged: false,
    last_notified: None,
  };
  record.active = Some(alert.clone());
  Outcome::Raised(alert)
}

fn evaluate_active(
  record: &mut AlertRecord,
  threshold: &ResolvedThreshold,
  value: f64,
  dampening: i64,
  now: i64,
) -> Outcome {
  // Resolution first: the value must sit at or below the warn clear
  // bound for the full dampening window.
  if let Some(first) = record.first_below_clear
    && now - first >= dampening
  {
    let alert = record.active.take().unwrap();
    record.last_resolved = Some((now, alert.trigger_threshold));
    record.first_below_clear = None;
    record.first_below_crit_clear = None;
    // Resolution is backdated to when the dwell completed, not when
    // the confirming sample arrived.
    return Outcome::Resolved(ResolvedAlert {
      alert,
      resolved_at: first + dampening,
    });
  }

  let active = record.active.as_mut().unwrap();
  active.value = value;

  match (active.level, threshold.crit) {
    (AlertLevel::Warning, Some(crit))
      if dwell_elapsed(record.first_above_crit, dampening, now) =>
    {
      active.level = AlertLevel::Critical;
      active.trigger_threshold = crit.trigger;
      active.clear_threshold = crit.clear;
      Outcome::Escalated(active.clone())
    }
    (AlertLevel::Critical, Some(_))
      if dwell_elapsed(
        record.first_below_crit_clear,
        dampening,
        now,
      ) =>
    {
      active.level = AlertLevel::Warning;
      active.trigger_threshold = threshold.warn.trigger;
      active.clear_threshold = threshold.warn.clear;
      Outcome::Deescalated(active.clone())
    }
    _ => Outcome::None,
  }
}

#[cfg(test)]
mod tests {
  use vigil_client::entities::alert::METRIC_CPU;

  use super::*;

  fn manager() -> AlertManager {
    let (events, _) = broadcast::channel(64);
    AlertManager::new(AlertsConfig::default(), events)
  }

  fn sample(value: f64, t_sec: f64) -> Sample<'static> {
    Sample {
      kind: InstanceKind::Pve,
      family: ResourceFamily::Guest,
      resource_id: "pve-pve1-100",
      resource_name: "web",
      metric: METRIC_CPU,
      value,
      now: (t_sec * 1000.0) as i64,
    }
  }

  #[test]
  fn raise_requires_continuous_dwell() {
    let alerts = manager();
    alerts.observe(sample(90.0, 0.0));
    alerts.observe(sample(91.0, 2.0));
    alerts.observe(sample(88.0, 4.0));
    assert!(alerts.active().is_empty());
    alerts.observe(sample(89.0, 5.1));
    let active = alerts.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].value, 89.0);
    assert_eq!(active[0].trigger_threshold, 80.0);
    assert_eq!(active[0].start_time, 5100);
  }

  #[test]
  fn dip_below_trigger_resets_dwell() {
    let alerts = manager();
    alerts.observe(sample(90.0, 0.0));
    alerts.observe(sample(70.0, 2.0));
    alerts.observe(sample(90.0, 4.0));
    alerts.observe(sample(90.0, 6.0));
    // Continuous run restarted at t=4; 6 < 4+5.
    assert!(alerts.active().is_empty());
    alerts.observe(sample(90.0, 9.0));
    assert_eq!(alerts.active().len(), 1);
  }

  #[test]
  fn resolve_backdates_to_dwell_completion() {
    let alerts = manager();
    alerts.observe(sample(90.0, 0.0));
    alerts.observe(sample(90.0, 5.0));
    assert_eq!(alerts.active().len(), 1);
    alerts.observe(sample(70.0, 10.0));
    assert_eq!(alerts.active().len(), 1);
    alerts.observe(sample(70.0, 16.0));
    assert!(alerts.active().is_empty());
    let resolved = alerts.recently_resolved();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].resolved_at, 15_000);
  }

  #[test]
  fn at_most_one_active_alert_per_resource_metric() {
    let alerts = manager();
    for t in 0..60 {
      alerts.observe(sample(99.0, t as f64));
    }
    assert_eq!(alerts.active().len(), 1);
  }

  #[test]
  fn escalates_to_critical_and_back() {
    let alerts = manager();
    // Warning raise (crit default for guest cpu is 95).
    alerts.observe(sample(90.0, 0.0));
    alerts.observe(sample(90.0, 5.0));
    assert_eq!(alerts.active()[0].level, AlertLevel::Warning);
    // Past crit trigger for the dampening window.
    alerts.observe(sample(97.0, 10.0));
    alerts.observe(sample(97.0, 15.0));
    assert_eq!(alerts.active()[0].level, AlertLevel::Critical);
    // Below crit clear (90) but above warn clear (75): deescalate.
    alerts.observe(sample(85.0, 20.0));
    alerts.observe(sample(85.0, 25.0));
    let active = alerts.active();
    assert_eq!(active[0].level, AlertLevel::Warning);
    assert_eq!(active[0].trigger_threshold, 80.0);
  }

  #[test]
  fn suppression_blocks_rapid_re_raise() {
    let alerts = manager();
    alerts.observe(sample(81.0, 0.0));
    alerts.observe(sample(81.0, 5.0));
    assert_eq!(alerts.active().len(), 1);
    // Resolve.
    alerts.observe(sample(70.0, 10.0));
    alerts.observe(sample(70.0, 16.0));
    assert!(alerts.active().is_empty());
    // Back above trigger but within window and under trigger+delta.
    alerts.observe(sample(81.0, 20.0));
    alerts.observe(sample(81.0, 26.0));
    assert!(alerts.active().is_empty());
    // Moves minimum_delta past the trigger: raises despite window.
    alerts.observe(sample(83.0, 30.0));
    alerts.observe(sample(83.0, 36.0));
    assert_eq!(alerts.active().len(), 1);
  }

  #[test]
  fn manual_resolve_ends_alert_immediately() {
    let alerts = manager();
    alerts.observe(sample(90.0, 0.0));
    alerts.observe(sample(90.0, 5.0));
    let id = alerts.active()[0].id.clone();
    let resolved = alerts.resolve_manual(&id, 7_000).unwrap();
    assert_eq!(resolved.resolved_at, 7_000);
    assert!(alerts.active().is_empty());
    assert!(alerts.resolve_manual(&id, 8_000).is_err());
  }

  #[test]
  fn acknowledge_marks_active_alert() {
    let alerts = manager();
    alerts.observe(sample(90.0, 0.0));
    alerts.observe(sample(90.0, 5.0));
    let id = alerts.active()[0].id.clone();
    let acked = alerts.acknowledge(&id).unwrap();
    assert!(acked.acknowledged);
    assert!(alerts.acknowledge("missing-cpu").is_err());
  }
}
