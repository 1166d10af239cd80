use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

/// How many reporting intervals may elapse before a silent agent's
/// host is considered offline.
pub const OFFLINE_AFTER_INTERVALS: i64 = 3;

/// Hosts with more than this share of stopped containers are
/// degraded.
pub const DEGRADED_STOPPED_RATIO: f64 = 0.35;

/// A Docker host, as assembled from agent push reports.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DockerHost {
  /// `docker:{machine_id}`, see [super::ids::docker_host_id].
  pub id: String,
  pub agent_id: String,
  pub hostname: String,
  #[serde(default)]
  pub display_name: String,
  #[serde(default)]
  pub machine_id: String,
  #[serde(default)]
  pub os: String,
  #[serde(default)]
  pub kernel: String,
  #[serde(default)]
  pub arch: String,
  #[serde(default)]
  pub docker_version: String,
  #[serde(default)]
  pub cpus: u32,
  #[serde(default)]
  pub total_memory: u64,
  #[serde(default)]
  pub uptime_sec: u64,
  pub status: DockerHostStatus,
  /// Timestamp (ms) of the last accepted report.
  pub last_seen: i64,
  /// The agent's configured reporting interval.
  #[serde(default = "default_interval_sec")]
  pub interval_sec: u64,
  #[serde(default)]
  pub agent_version: String,
  #[serde(default)]
  pub containers: Vec<DockerContainer>,
  /// Set while an uninstall command is in flight for this host.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pending_command: Option<String>,
}

fn default_interval_sec() -> u64 {
  30
}

impl DockerHost {
  /// Derive the status from the report freshness and container mix.
  pub fn derived_status(&self, now: i64) -> DockerHostStatus {
    let cutoff = self.last_seen
      + OFFLINE_AFTER_INTERVALS * (self.interval_sec as i64) * 1000;
    let running = self
      .containers
      .iter()
      .filter(|c| c.state.eq_ignore_ascii_case("running"))
      .count();
    if now > cutoff || (!self.containers.is_empty() && running == 0) {
      return DockerHostStatus::Offline;
    }
    let unhealthy = self.containers.iter().any(|c| {
      matches!(
        c.health.as_deref(),
        Some("unhealthy") | Some("starting")
      )
    });
    let stopped = self.containers.len() - running;
    let stopped_ratio = if self.containers.is_empty() {
      0.0
    } else {
      stopped as f64 / self.containers.len() as f64
    };
    if unhealthy || stopped_ratio > DEGRADED_STOPPED_RATIO {
      DockerHostStatus::Degraded
    } else {
      DockerHostStatus::Online
    }
  }
}

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
pub enum DockerHostStatus {
  Online,
  Degraded,
  #[default]
  Offline,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DockerContainer {
  pub id: String,
  pub name: String,
  pub image: String,
  /// `running`, `exited`, `paused`, ...
  pub state: String,
  /// Human readable status line, eg. `Up 3 days`.
  #[serde(default)]
  pub status: String,
  /// `healthy` / `unhealthy` / `starting` when a healthcheck exists.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub health: Option<String>,
  #[serde(default)]
  pub cpu_percent: f64,
  #[serde(default)]
  pub memory_usage: u64,
  #[serde(default)]
  pub memory_limit: u64,
  #[serde(default)]
  pub memory_percent: f64,
  #[serde(default)]
  pub uptime_sec: u64,
  #[serde(default)]
  pub restart_count: u32,
  #[serde(default)]
  pub exit_code: i32,
  pub created_at: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<i64>,
  #[serde(default)]
  pub ports: Vec<String>,
  #[serde(default)]
  pub labels: IndexMap<String, String>,
  #[serde(default)]
  pub networks: Vec<String>,
}

/// The body an agent pushes on every heartbeat.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AgentReport {
  pub agent_id: String,
  pub hostname: String,
  #[serde(default)]
  pub display_name: String,
  #[serde(default)]
  pub machine_id: String,
  #[serde(default)]
  pub os: String,
  #[serde(default)]
  pub kernel: String,
  #[serde(default)]
  pub arch: String,
  #[serde(default)]
  pub docker_version: String,
  #[serde(default)]
  pub cpus: u32,
  #[serde(default)]
  pub total_memory: u64,
  #[serde(default)]
  pub uptime_sec: u64,
  #[serde(default = "default_interval_sec")]
  pub interval_sec: u64,
  #[serde(default)]
  pub agent_version: String,
  #[serde(default)]
  pub containers: Vec<DockerContainer>,
}

/// Reply to a report, carrying the next queued command if any.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ReportResponse {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub command: Option<DockerHostCommand>,
}

/// Administrative action delivered to an agent in its heartbeat
/// reply. Currently only `stop` (uninstall).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DockerHostCommand {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: DockerCommandKind,
  pub status: DockerCommandStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  pub created_at: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dispatched_at: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub acknowledged_at: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failed_at: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expires_at: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure_reason: Option<String>,
}

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
pub enum DockerCommandKind {
  #[default]
  Stop,
}

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
pub enum DockerCommandStatus {
  #[default]
  Queued,
  Dispatched,
  Acknowledged,
  Completed,
  Failed,
  Expired,
}

impl DockerCommandStatus {
  /// Terminal states never transition again.
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      DockerCommandStatus::Completed
        | DockerCommandStatus::Failed
        | DockerCommandStatus::Expired
    )
  }

  /// A host may only carry one command in these states.
  pub fn is_in_flight(self) -> bool {
    matches!(
      self,
      DockerCommandStatus::Queued
        | DockerCommandStatus::Dispatched
        | DockerCommandStatus::Acknowledged
    )
  }
}

impl DockerHostCommand {
  /// Allowed transitions:
  /// queued -> dispatched | expired
  /// dispatched -> acknowledged | completed | failed | expired
  /// acknowledged -> completed | failed | expired
  pub fn transition(
    &mut self,
    to: DockerCommandStatus,
    now: i64,
  ) -> anyhow::Result<()> {
    use DockerCommandStatus::*;
    let allowed = match (self.status, to) {
      (Queued, Dispatched) => true,
      (Dispatched, Acknowledged) => true,
      (Dispatched, Completed) | (Dispatched, Failed) => true,
      (Acknowledged, Completed) | (Acknowledged, Failed) => true,
      (from, Expired) if !from.is_terminal() => true,
      _ => false,
    };
    if !allowed {
      anyhow::bail!(
        "command {} cannot transition {} -> {}",
        self.id,
        self.status,
        to
      );
    }
    self.status = to;
    match to {
      Dispatched => self.dispatched_at = Some(now),
      Acknowledged => self.acknowledged_at = Some(now),
      Completed => self.completed_at = Some(now),
      Failed => self.failed_at = Some(now),
      Expired => {}
      Queued => {}
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn host(containers: Vec<DockerContainer>) -> DockerHost {
    DockerHost {
      last_seen: 1_000_000,
      interval_sec: 30,
      containers,
      ..Default::default()
    }
  }

  fn container(state: &str, health: Option<&str>) -> DockerContainer {
    DockerContainer {
      state: state.into(),
      health: health.map(Into::into),
      ..Default::default()
    }
  }

  #[test]
  fn silent_host_goes_offline() {
    let host = host(vec![container("running", None)]);
    // 3 x 30s after last_seen.
    let cutoff = 1_000_000 + 3 * 30 * 1000;
    assert_eq!(
      host.derived_status(cutoff - 1),
      DockerHostStatus::Online
    );
    assert_eq!(
      host.derived_status(cutoff + 1),
      DockerHostStatus::Offline
    );
  }

  #[test]
  fn no_running_containers_is_offline() {
    let host = host(vec![container("exited", None)]);
    assert_eq!(
      host.derived_status(1_000_001),
      DockerHostStatus::Offline
    );
  }

  #[test]
  fn unhealthy_container_degrades() {
    let host = host(vec![
      container("running", Some("unhealthy")),
      container("running", None),
    ]);
    assert_eq!(
      host.derived_status(1_000_001),
      DockerHostStatus::Degraded
    );
  }

  #[test]
  fn heavy_stopped_ratio_degrades() {
    let host = host(vec![
      container("running", None),
      container("exited", None),
    ]);
    // 50% stopped > 35%
    assert_eq!(
      host.derived_status(1_000_001),
      DockerHostStatus::Degraded
    );
  }

  #[test]
  fn command_lifecycle_happy_path() {
    let mut command = DockerHostCommand {
      id: "c1".into(),
      kind: DockerCommandKind::Stop,
      status: DockerCommandStatus::Queued,
      message: None,
      created_at: 0,
      dispatched_at: None,
      acknowledged_at: None,
      completed_at: None,
      failed_at: None,
      expires_at: None,
      failure_reason: None,
    };
    command.transition(DockerCommandStatus::Dispatched, 1).unwrap();
    command.transition(DockerCommandStatus::Acknowledged, 2).unwrap();
    command.transition(DockerCommandStatus::Completed, 3).unwrap();
    assert_eq!(command.dispatched_at, Some(1));
    assert_eq!(command.acknowledged_at, Some(2));
    assert_eq!(command.completed_at, Some(3));
  }

  #[test]
  fn undeclared_transitions_fail_and_leave_state() {
    let mut command = DockerHostCommand {
      id: "c1".into(),
      kind: DockerCommandKind::Stop,
      status: DockerCommandStatus::Queued,
      message: None,
      created_at: 0,
      dispatched_at: None,
      acknowledged_at: None,
      completed_at: None,
      failed_at: None,
      expires_at: None,
      failure_reason: None,
    };
    // queued cannot be acknowledged before dispatch
    assert!(
      command.transition(DockerCommandStatus::Acknowledged, 1).is_err()
    );
    assert_eq!(command.status, DockerCommandStatus::Queued);
    // terminal states are final
    command.transition(DockerCommandStatus::Expired, 1).unwrap();
    assert!(
      command.transition(DockerCommandStatus::Dispatched, 2).is_err()
    );
    assert_eq!(command.status, DockerCommandStatus::Expired);
  }
}
