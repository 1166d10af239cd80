//! Docker agent channel scenarios: machine id collisions, the
//! command lifecycle over the report/ack round trip, and the store
//! events both produce.

use std::sync::Arc;

use vigil_client::{
  entities::docker::{
    AgentReport, DockerCommandStatus, DockerContainer,
    DockerHostStatus,
  },
  ws::WsEventKind,
};
use vigil_core::{docker::DockerChannel, store::Store};

fn running_container(name: &str) -> DockerContainer {
  DockerContainer {
    id: format!("c-{name}"),
    name: name.to_string(),
    image: "nginx:latest".into(),
    state: "running".into(),
    ..Default::default()
  }
}

fn report(agent_id: &str, machine_id: &str) -> AgentReport {
  AgentReport {
    agent_id: agent_id.to_string(),
    hostname: format!("host-{agent_id}"),
    machine_id: machine_id.to_string(),
    interval_sec: 30,
    containers: vec![running_container(agent_id)],
    ..Default::default()
  }
}

#[test]
fn same_machine_id_from_two_agents_coexists() {
  let store = Arc::new(Store::default());
  let channel = DockerChannel::new(store.clone());

  channel.ingest_report(report("agent-1", "m1"), 1_000);
  channel.ingest_report(report("agent-2", "m1"), 1_500);

  let hosts = store.docker_hosts();
  assert_eq!(hosts.len(), 2);
  assert_eq!(hosts[0].id, "docker:m1");
  assert_eq!(hosts[1].id, "docker:m1-agent-2");
  // Container lists are independent.
  assert_eq!(hosts[0].containers[0].name, "agent-1");
  assert_eq!(hosts[1].containers[0].name, "agent-2");
  assert_eq!(hosts[0].status, DockerHostStatus::Online);
}

#[test]
fn report_round_trip_delivers_and_completes_command() {
  let store = Arc::new(Store::default());
  let channel = DockerChannel::new(store.clone());
  channel.ingest_report(report("agent-1", "m1"), 1_000);

  let queued =
    channel.queue_stop_command("docker:m1", 2_000).unwrap();
  assert_eq!(queued.status, DockerCommandStatus::Queued);
  assert_eq!(
    store.docker_host("docker:m1").unwrap().pending_command,
    Some(queued.id.clone())
  );

  // Next heartbeat gets the command, dispatched.
  let reply = channel.ingest_report(report("agent-1", "m1"), 3_000);
  let delivered = reply.command.expect("command in reply");
  assert_eq!(delivered.status, DockerCommandStatus::Dispatched);

  // Agent acknowledges, then completes.
  channel
    .acknowledge(
      &delivered.id,
      "docker:m1",
      DockerCommandStatus::Acknowledged,
      None,
      4_000,
    )
    .unwrap();
  let completed = channel
    .acknowledge(
      &delivered.id,
      "docker:m1",
      DockerCommandStatus::Completed,
      Some("agent removed".into()),
      5_000,
    )
    .unwrap();
  assert_eq!(completed.status, DockerCommandStatus::Completed);
  assert_eq!(completed.acknowledged_at, Some(4_000));
  assert_eq!(completed.completed_at, Some(5_000));
  assert!(
    store
      .docker_host("docker:m1")
      .unwrap()
      .pending_command
      .is_none()
  );
}

#[test]
fn invalid_transitions_are_rejected_and_state_is_unchanged() {
  let store = Arc::new(Store::default());
  let channel = DockerChannel::new(store);
  channel.ingest_report(report("agent-1", "m1"), 1_000);
  let queued =
    channel.queue_stop_command("docker:m1", 2_000).unwrap();

  // Completed before dispatch is a contract error (queued command).
  let err = channel
    .acknowledge(
      &queued.id,
      "docker:m1",
      DockerCommandStatus::Completed,
      None,
      3_000,
    )
    .unwrap_err();
  assert!(err.to_string().contains("cannot transition"));
  assert_eq!(
    channel.command_for("docker:m1", 3_000).unwrap().status,
    DockerCommandStatus::Queued
  );

  // Unknown command id.
  assert!(
    channel
      .acknowledge(
        "not-a-command",
        "docker:m1",
        DockerCommandStatus::Acknowledged,
        None,
        3_000,
      )
      .is_err()
  );

  // Statuses agents may not send.
  for status in [
    DockerCommandStatus::Queued,
    DockerCommandStatus::Dispatched,
    DockerCommandStatus::Expired,
  ] {
    assert!(
      channel
        .acknowledge(&queued.id, "docker:m1", status, None, 3_000)
        .is_err()
    );
  }
}

#[test]
fn store_emits_host_events_for_reports() {
  let store = Arc::new(Store::default());
  let mut events = store.subscribe();
  let channel = DockerChannel::new(store);
  channel.ingest_report(report("agent-1", "m1"), 1_000);
  let event = events.try_recv().expect("host updated event");
  assert_eq!(event.kind, WsEventKind::DockerHostUpdated);
}

#[test]
fn removing_a_host_clears_store_and_queue() {
  let store = Arc::new(Store::default());
  let channel = DockerChannel::new(store.clone());
  channel.ingest_report(report("agent-1", "m1"), 1_000);
  channel.queue_stop_command("docker:m1", 1_000).unwrap();
  channel.remove_host("docker:m1").unwrap();
  assert!(store.docker_host("docker:m1").is_none());
  assert!(channel.command_for("docker:m1", 2_000).is_none());
  assert!(channel.remove_host("docker:m1").is_err());
}

#[test]
fn offline_host_without_running_containers() {
  let store = Arc::new(Store::default());
  let channel = DockerChannel::new(store.clone());
  let mut stopped = report("agent-1", "m1");
  stopped.containers = vec![DockerContainer {
    state: "exited".into(),
    ..running_container("agent-1")
  }];
  channel.ingest_report(stopped, 1_000);
  assert_eq!(
    store.docker_host("docker:m1").unwrap().status,
    DockerHostStatus::Offline
  );
}
