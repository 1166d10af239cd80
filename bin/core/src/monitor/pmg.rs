//! One PMG poll cycle: mail flow, queues and quarantine.

use proxmox_client::{ProxmoxClient, error::Result};
use vigil_client::entities::{
  instance::Instance,
  pmg::{
    PmgDomainStats, PmgMailStats, PmgQuarantine, PmgQueueStatus,
    PmgSummary,
  },
};

use crate::{
  alert::AlertManager, monitor::tracker::change_hash, store::Store,
};

pub async fn poll_pmg(
  client: &ProxmoxClient,
  instance: &Instance,
  store: &Store,
  alerts: &AlertManager,
  now: i64,
) -> Result<String> {
  let mail = client.mail_statistics().await?;

  // The queue lives on the node; take the first member.
  let nodes = client.pmg_nodes().await?;
  let node_name = nodes
    .first()
    .map(|n| n.node.clone())
    .unwrap_or_else(|| "localhost".to_string());

  let mut queues = PmgQueueStatus::default();
  match client.postfix_queue(&node_name).await {
    Ok(items) => {
      for item in items {
        match item.queue_name.as_str() {
          "deferred" => queues.deferred += item.count,
          "active" => queues.active += item.count,
          "hold" => queues.hold += item.count,
          _ => {}
        }
        queues.oldest_age_sec = queues.oldest_age_sec.max(item.oldest);
      }
    }
    Err(e) => {
      tracing::warn!(
        instance = %instance.id,
        "postfix queue unavailable | {e}"
      );
    }
  }

  let quarantine = client
    .quarantine_status()
    .await
    .map(|q| PmgQuarantine {
      spam: q.spam,
      virus: q.virus,
      attachment: q.attachment,
      blacklisted: q.blacklisted,
    })
    .unwrap_or_default();

  let mut domains: Vec<PmgDomainStats> = client
    .domain_statistics()
    .await
    .unwrap_or_default()
    .into_iter()
    .map(|d| PmgDomainStats {
      domain: d.domain,
      count_in: d.count_in,
      count_out: d.count_out,
      spam_in: d.spamcount_in,
    })
    .collect();
  domains.sort_by(|a, b| a.domain.cmp(&b.domain));

  let node_status = client
    .pmg_node_status(&node_name)
    .await
    .unwrap_or_default();

  let summary = PmgSummary {
    instance: instance.id.clone(),
    version: client
      .version()
      .await
      .map(|v| v.version)
      .unwrap_or_default(),
    uptime_sec: node_status.uptime,
    mail: PmgMailStats {
      count_in: mail.count_in,
      count_out: mail.count_out,
      spam_in: mail.spamcount_in,
      virus_in: mail.viruscount_in,
      bounces_in: mail.bounces_in,
      bounces_out: mail.bounces_out,
      avg_process_time: mail.avg_process_time,
    },
    queues,
    quarantine,
    domains,
  };

  let hash = change_hash(&summary);
  store.set_pmg_summary(summary.clone());
  alerts.check_pmg_queues(&summary, now);

  Ok(hash)
}
