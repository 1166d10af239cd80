//! One PBS poll cycle: datastores, backups and job health.

use proxmox_client::{
  PbsJobStatus, ProxmoxClient,
  error::{Error, Result},
};
use vigil_client::entities::{
  backup::{Backup, BackupKind},
  instance::Instance,
  pbs::{PbsDatastore, PbsJob, PbsJobKind, PbsSummary},
};

use crate::{
  alert::AlertManager, monitor::tracker::change_hash, store::Store,
};

pub async fn poll_pbs(
  client: &ProxmoxClient,
  instance: &Instance,
  store: &Store,
  alerts: &AlertManager,
  now: i64,
) -> Result<String> {
  let usage = client.datastore_usage().await?;
  let node_status = client.pbs_node_status().await?;
  let gc = client.garbage_collection_status().await.unwrap_or_default();

  let mut datastores: Vec<PbsDatastore> = usage
    .iter()
    .map(|u| PbsDatastore {
      name: u.store.clone(),
      total: u.total,
      used: u.used,
      free: u.avail,
      usage: if u.total > 0 {
        100.0 * u.used as f64 / u.total as f64
      } else {
        -1.0
      },
      estimated_full_sec: u.estimated_full_date,
      gc_status: gc
        .iter()
        .find(|g| g.store == u.store)
        .and_then(|g| g.last_run_state.clone()),
    })
    .collect();
  datastores.sort_by(|a, b| a.name.cmp(&b.name));

  let mut jobs = Vec::new();
  match client.verify_jobs().await {
    Ok(items) => {
      jobs.extend(map_jobs(items, PbsJobKind::Verify));
    }
    Err(e) => log_job_error(instance, "verify", &e),
  }
  match client.sync_jobs().await {
    Ok(items) => jobs.extend(map_jobs(items, PbsJobKind::Sync)),
    Err(e) => log_job_error(instance, "sync", &e),
  }
  match client.prune_jobs().await {
    Ok(items) => jobs.extend(map_jobs(items, PbsJobKind::Prune)),
    Err(e) => log_job_error(instance, "prune", &e),
  }
  jobs.extend(gc.iter().map(|g| PbsJob {
    id: format!("gc-{}", g.store),
    kind: PbsJobKind::GarbageCollection,
    datastore: g.store.clone(),
    last_run: g.last_run_endtime.unwrap_or_default(),
    last_run_ok: g
      .last_run_state
      .as_deref()
      .map(job_state_ok)
      .unwrap_or(true),
    last_run_status: g.last_run_state.clone().unwrap_or_default(),
    next_run: g.next_run,
  }));
  jobs.sort_by(|a, b| a.id.cmp(&b.id));

  // Host-config backups (vmid 0) land here too: PBS is their
  // canonical bucket.
  let mut backups = Vec::new();
  // Datastores deleted between the usage listing and the snapshot
  // call drop out of the summary instead of lingering.
  let mut vanished: Vec<String> = Vec::new();
  for datastore in &datastores {
    match client.datastore_snapshots(&datastore.name, None).await {
      Ok(items) => {
        for item in items {
          let kind = match item.backup_type.as_str() {
            "ct" => BackupKind::Ct,
            "host" => BackupKind::Host,
            _ => BackupKind::Vm,
          };
          let vmid = if kind == BackupKind::Host {
            0
          } else {
            item.backup_id.parse().unwrap_or(0)
          };
          backups.push(Backup {
            id: format!(
              "{}-{}-{}/{}/{}",
              instance.id,
              datastore.name,
              item.backup_type,
              item.backup_id,
              item.backup_time
            ),
            instance: instance.id.clone(),
            datastore: datastore.name.clone(),
            vmid,
            kind,
            time: item.backup_time,
            size: item.size,
            protected: item.protected,
            verified: item
              .verification
              .as_ref()
              .map(|v| v.state == "ok")
              .unwrap_or(false),
            verification: item.verification.map(|v| v.state),
            namespace: item.ns,
          });
        }
      }
      Err(Error::NotFound(_)) => {
        tracing::info!(
          instance = %instance.id,
          datastore = %datastore.name,
          "datastore deleted upstream, pruning"
        );
        vanished.push(datastore.name.clone());
      }
      Err(e) => {
        tracing::warn!(
          instance = %instance.id,
          datastore = %datastore.name,
          "pbs snapshot listing failed | {e}"
        );
      }
    }
  }
  datastores.retain(|d| !vanished.contains(&d.name));
  backups.sort_by(|a, b| a.id.cmp(&b.id));

  let summary = PbsSummary {
    instance: instance.id.clone(),
    version: client
      .version()
      .await
      .map(|v| v.version)
      .unwrap_or_default(),
    cpu: node_status.cpu,
    memory_total: node_status.memory.total,
    memory_used: node_status.memory.used,
    uptime_sec: node_status.uptime,
    datastores,
    jobs,
  };

  let hash = change_hash(&(&summary, &backups));

  store.replace_backups(&instance.id, backups);
  store.set_pbs_summary(summary.clone());

  alerts.check_pbs_jobs(&summary, now);
  for datastore in &summary.datastores {
    if datastore.usage < 0.0 {
      continue;
    }
    alerts.observe(crate::alert::Sample {
      kind: vigil_client::entities::InstanceKind::Pbs,
      family: vigil_client::entities::alert::ResourceFamily::Storage,
      resource_id: &format!(
        "{}-{}",
        instance.id, datastore.name
      ),
      resource_name: &datastore.name,
      metric: vigil_client::entities::alert::METRIC_DISK,
      value: datastore.usage,
      now,
    });
  }

  Ok(hash)
}

fn map_jobs(
  items: Vec<PbsJobStatus>,
  kind: PbsJobKind,
) -> Vec<PbsJob> {
  items
    .into_iter()
    .map(|item| PbsJob {
      id: item.id,
      kind,
      datastore: item.store,
      last_run: item.last_run_endtime.unwrap_or_default(),
      last_run_ok: item
        .last_run_state
        .as_deref()
        .map(job_state_ok)
        .unwrap_or(true),
      last_run_status: item.last_run_state.unwrap_or_default(),
      next_run: item.next_run,
    })
    .collect()
}

/// PBS reports `OK` on success; anything else is the error line.
fn job_state_ok(state: &str) -> bool {
  state.eq_ignore_ascii_case("ok") || state.is_empty()
}

fn log_job_error(
  instance: &Instance,
  kind: &str,
  e: &proxmox_client::error::Error,
) {
  tracing::warn!(
    instance = %instance.id,
    "pbs {kind} job listing failed | {e}"
  );
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn job_state_ok_variants() {
    assert!(job_state_ok("OK"));
    assert!(job_state_ok("ok"));
    assert!(job_state_ok(""));
    assert!(!job_state_ok("verification failed"));
  }

  #[test]
  fn map_jobs_carries_failure_state() {
    let jobs = map_jobs(
      vec![PbsJobStatus {
        id: "v-daily".into(),
        store: "tank".into(),
        last_run_state: Some("error: chunk missing".into()),
        last_run_endtime: Some(1_700_000_000),
        next_run: None,
      }],
      PbsJobKind::Verify,
    );
    assert_eq!(jobs.len(), 1);
    assert!(!jobs[0].last_run_ok);
    assert_eq!(jobs[0].kind, PbsJobKind::Verify);
  }
}
