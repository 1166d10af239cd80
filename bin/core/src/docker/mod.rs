//! The push channel for Docker agents.
//!
//! Agents report over authenticated HTTP on their own cadence; the
//! reply to each report carries the next queued command for that
//! host. Command lifecycle and the host's pending-command marker are
//! always mutated together, through this channel.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;
use vigil_client::entities::{
  docker::{
    AgentReport, DockerCommandKind, DockerCommandStatus,
    DockerHost, DockerHostCommand, ReportResponse,
  },
  ids::{docker_host_id, docker_host_id_disambiguated},
};

use crate::store::Store;

/// Commands live ten minutes from creation.
const COMMAND_TTL_MS: i64 = 10 * 60 * 1000;

pub struct DockerChannel {
  store: Arc<Store>,
  /// At most one command per host, keyed by host id.
  commands: DashMap<String, DockerHostCommand>,
}

impl DockerChannel {
  pub fn new(store: Arc<Store>) -> DockerChannel {
    DockerChannel { store, commands: DashMap::new() }
  }

  /// Upsert the host from an agent report and hand back any queued
  /// command. The caller has already authenticated the agent.
  pub fn ingest_report(
    &self,
    report: AgentReport,
    now: i64,
  ) -> ReportResponse {
    let host_id = self.derive_host_id(&report);
    let command = self.next_command(&host_id, now);
    let mut host = DockerHost {
      id: host_id,
      agent_id: report.agent_id,
      hostname: report.hostname,
      display_name: report.display_name,
      machine_id: report.machine_id,
      os: report.os,
      kernel: report.kernel,
      arch: report.arch,
      docker_version: report.docker_version,
      cpus: report.cpus,
      total_memory: report.total_memory,
      uptime_sec: report.uptime_sec,
      status: Default::default(),
      last_seen: now,
      interval_sec: report.interval_sec.max(1),
      agent_version: report.agent_version,
      containers: report.containers,
      pending_command: command.as_ref().map(|c| c.id.clone()),
    };
    host.status = host.derived_status(now);
    self.store.upsert_docker_host(host);
    ReportResponse { command }
  }

  /// Stable host id. A second agent claiming an already-registered
  /// machine id gets a deterministic disambiguated id, so both hosts
  /// coexist with independent container lists.
  fn derive_host_id(&self, report: &AgentReport) -> String {
    let id = docker_host_id(
      Some(&report.machine_id),
      &report.agent_id,
      &report.hostname,
    );
    if !report.machine_id.is_empty()
      && let Some(existing) = self.store.docker_host(&id)
      && existing.agent_id != report.agent_id
    {
      return docker_host_id_disambiguated(
        &report.machine_id,
        &report.agent_id,
      );
    }
    id
  }

  /// The command to include in a report reply. Queued commands are
  /// dispatched; dispatched ones are redelivered until acted on.
  fn next_command(
    &self,
    host_id: &str,
    now: i64,
  ) -> Option<DockerHostCommand> {
    if self.expire_if_due(host_id, now) {
      return None;
    }
    let mut entry = self.commands.get_mut(host_id)?;
    match entry.status {
      DockerCommandStatus::Queued => {
        if let Err(e) =
          entry.transition(DockerCommandStatus::Dispatched, now)
        {
          tracing::error!("command dispatch failed | {e:#}");
          return None;
        }
        Some(entry.clone())
      }
      DockerCommandStatus::Dispatched => Some(entry.clone()),
      _ => None,
    }
  }

  /// Enqueue a stop (uninstall) command. At most one command may be
  /// in flight per host.
  pub fn queue_stop_command(
    &self,
    host_id: &str,
    now: i64,
  ) -> anyhow::Result<DockerHostCommand> {
    if self.store.docker_host(host_id).is_none() {
      anyhow::bail!("no docker host '{host_id}'");
    }
    self.expire_if_due(host_id, now);
    if let Some(existing) = self.commands.get(host_id)
      && existing.status.is_in_flight()
    {
      anyhow::bail!(
        "host '{host_id}' already has a {} command in flight",
        existing.status
      );
    }
    let command = DockerHostCommand {
      id: Uuid::new_v4().to_string(),
      kind: DockerCommandKind::Stop,
      status: DockerCommandStatus::Queued,
      message: None,
      created_at: now,
      dispatched_at: None,
      acknowledged_at: None,
      completed_at: None,
      failed_at: None,
      expires_at: Some(now + COMMAND_TTL_MS),
      failure_reason: None,
    };
    self
      .commands
      .insert(host_id.to_string(), command.clone());
    self
      .store
      .set_docker_pending_command(host_id, Some(command.id.clone()));
    Ok(command)
  }

  /// Agent acknowledgement. Only `acknowledged`, `completed` and
  /// `failed` are accepted from the wire; anything else is a
  /// contract error and leaves the command untouched.
  pub fn acknowledge(
    &self,
    command_id: &str,
    host_id: &str,
    status: DockerCommandStatus,
    message: Option<String>,
    now: i64,
  ) -> anyhow::Result<DockerHostCommand> {
    if !matches!(
      status,
      DockerCommandStatus::Acknowledged
        | DockerCommandStatus::Completed
        | DockerCommandStatus::Failed
    ) {
      anyhow::bail!("status '{status}' is not accepted from agents");
    }
    if self.expire_if_due(host_id, now) {
      anyhow::bail!("command '{command_id}' expired");
    }
    let result = {
      let mut entry =
        self.commands.get_mut(host_id).ok_or_else(|| {
          anyhow::anyhow!("no command in flight for '{host_id}'")
        })?;
      if entry.id != command_id {
        anyhow::bail!(
          "command id mismatch: expected '{}'",
          entry.id
        );
      }
      entry.transition(status, now)?;
      if let Some(message) = message {
        if status == DockerCommandStatus::Failed {
          entry.failure_reason = Some(message.clone());
        }
        entry.message = Some(message);
      }
      entry.clone()
    };
    if result.status.is_terminal() {
      self.store.set_docker_pending_command(host_id, None);
    }
    Ok(result)
  }

  pub fn command_for(
    &self,
    host_id: &str,
    now: i64,
  ) -> Option<DockerHostCommand> {
    self.expire_if_due(host_id, now);
    self.commands.get(host_id).map(|c| c.clone())
  }

  /// Lazy TTL: an expired command transitions to `expired` on first
  /// access and leaves the queue.
  fn expire_if_due(&self, host_id: &str, now: i64) -> bool {
    let expired = {
      let Some(mut entry) = self.commands.get_mut(host_id) else {
        return false;
      };
      let due = entry
        .expires_at
        .map(|at| now >= at)
        .unwrap_or(false);
      if !due || entry.status.is_terminal() {
        // Terminal commands just age out of the map.
        if due {
          drop(entry);
          self.commands.remove(host_id);
        }
        return false;
      }
      if let Err(e) =
        entry.transition(DockerCommandStatus::Expired, now)
      {
        tracing::error!("command expiry failed | {e:#}");
        return false;
      }
      tracing::info!(
        host = host_id,
        command = %entry.id,
        "docker command expired undelivered"
      );
      true
    };
    if expired {
      self.commands.remove(host_id);
      self.store.set_docker_pending_command(host_id, None);
    }
    expired
  }

  /// Operator-initiated removal of a host and anything queued for
  /// it.
  pub fn remove_host(&self, host_id: &str) -> anyhow::Result<()> {
    self.commands.remove(host_id);
    self
      .store
      .remove_docker_host(host_id)
      .map(|_| ())
      .ok_or_else(|| anyhow::anyhow!("no docker host '{host_id}'"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn channel() -> DockerChannel {
    DockerChannel::new(Arc::new(Store::default()))
  }

  fn report(agent_id: &str, machine_id: &str) -> AgentReport {
    AgentReport {
      agent_id: agent_id.to_string(),
      hostname: format!("host-{agent_id}"),
      machine_id: machine_id.to_string(),
      interval_sec: 30,
      containers: vec![
        vigil_client::entities::docker::DockerContainer {
          id: "c1".into(),
          name: "app".into(),
          state: "running".into(),
          ..Default::default()
        },
      ],
      ..Default::default()
    }
  }

  #[test]
  fn duplicate_machine_ids_coexist() {
    let channel = channel();
    channel.ingest_report(report("agent-1", "m1"), 1000);
    channel.ingest_report(report("agent-2", "m1"), 2000);
    let hosts = channel.store.docker_hosts();
    assert_eq!(hosts.len(), 2);
    assert_eq!(hosts[0].id, "docker:m1");
    assert_eq!(hosts[1].id, "docker:m1-agent-2");
    // Subsequent reports keep mapping to the same ids.
    channel.ingest_report(report("agent-2", "m1"), 3000);
    assert_eq!(channel.store.docker_hosts().len(), 2);
  }

  #[test]
  fn queued_command_dispatches_in_reply_once_queued() {
    let channel = channel();
    channel.ingest_report(report("agent-1", "m1"), 1000);
    let command =
      channel.queue_stop_command("docker:m1", 1000).unwrap();
    assert_eq!(command.status, DockerCommandStatus::Queued);
    let reply = channel.ingest_report(report("agent-1", "m1"), 2000);
    let delivered = reply.command.unwrap();
    assert_eq!(delivered.id, command.id);
    assert_eq!(delivered.status, DockerCommandStatus::Dispatched);
    // Redelivered until acted on.
    let reply = channel.ingest_report(report("agent-1", "m1"), 3000);
    assert!(reply.command.is_some());
  }

  #[test]
  fn one_in_flight_command_per_host() {
    let channel = channel();
    channel.ingest_report(report("agent-1", "m1"), 1000);
    channel.queue_stop_command("docker:m1", 1000).unwrap();
    assert!(channel.queue_stop_command("docker:m1", 2000).is_err());
  }

  #[test]
  fn acknowledge_lifecycle_and_contract_errors() {
    let channel = channel();
    channel.ingest_report(report("agent-1", "m1"), 1000);
    let command =
      channel.queue_stop_command("docker:m1", 1000).unwrap();
    channel.ingest_report(report("agent-1", "m1"), 2000);
    // Wrong host.
    assert!(
      channel
        .acknowledge(
          &command.id,
          "docker:other",
          DockerCommandStatus::Acknowledged,
          None,
          3000,
        )
        .is_err()
    );
    // Statuses outside the agent contract.
    assert!(
      channel
        .acknowledge(
          &command.id,
          "docker:m1",
          DockerCommandStatus::Expired,
          None,
          3000,
        )
        .is_err()
    );
    let acked = channel
      .acknowledge(
        &command.id,
        "docker:m1",
        DockerCommandStatus::Acknowledged,
        None,
        3000,
      )
      .unwrap();
    assert_eq!(acked.status, DockerCommandStatus::Acknowledged);
    let completed = channel
      .acknowledge(
        &command.id,
        "docker:m1",
        DockerCommandStatus::Completed,
        Some("uninstalled".into()),
        4000,
      )
      .unwrap();
    assert_eq!(completed.status, DockerCommandStatus::Completed);
    // Terminal: the pending marker clears.
    assert!(
      channel
        .store
        .docker_host("docker:m1")
        .unwrap()
        .pending_command
        .is_none()
    );
  }

  #[test]
  fn failure_records_reason() {
    let channel = channel();
    channel.ingest_report(report("agent-1", "m1"), 1000);
    let command =
      channel.queue_stop_command("docker:m1", 1000).unwrap();
    channel.ingest_report(report("agent-1", "m1"), 2000);
    let failed = channel
      .acknowledge(
        &command.id,
        "docker:m1",
        DockerCommandStatus::Failed,
        Some("permission denied".into()),
        3000,
      )
      .unwrap();
    assert_eq!(
      failed.failure_reason.as_deref(),
      Some("permission denied")
    );
  }

  #[test]
  fn undelivered_command_expires_after_ttl() {
    let channel = channel();
    channel.ingest_report(report("agent-1", "m1"), 0);
    let command =
      channel.queue_stop_command("docker:m1", 0).unwrap();
    // Just before the TTL it is still queued.
    assert!(
      channel.command_for("docker:m1", COMMAND_TTL_MS - 1).is_some()
    );
    // First access past the TTL expires and removes it.
    assert!(
      channel.command_for("docker:m1", COMMAND_TTL_MS).is_none()
    );
    assert!(
      channel
        .acknowledge(
          &command.id,
          "docker:m1",
          DockerCommandStatus::Completed,
          None,
          COMMAND_TTL_MS + 1,
        )
        .is_err()
    );
    // A fresh command can be queued again.
    assert!(
      channel
        .queue_stop_command("docker:m1", COMMAND_TTL_MS + 2)
        .is_ok()
    );
  }
}
