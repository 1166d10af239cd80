//! Proxmox Mail Gateway operations.

use serde::Deserialize;

use crate::{
  ProxmoxClient,
  error::Result,
  wire::{f64_flexible, u64_flexible},
};

/// Counters from `/statistics/mail`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct MailStatistics {
  #[serde(default, deserialize_with = "u64_flexible")]
  pub count_in: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub count_out: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub spamcount_in: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub viruscount_in: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub bounces_in: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub bounces_out: u64,
  /// Average processing time in seconds.
  #[serde(rename = "avptime", default, deserialize_with = "f64_flexible")]
  pub avg_process_time: f64,
}

/// Per sender domain counters from `/statistics/domains`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct DomainStatistics {
  #[serde(default)]
  pub domain: String,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub count_in: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub count_out: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub spamcount_in: u64,
}

/// Postfix queue summary from `/nodes/{node}/postfix/queue`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PostfixQueueItem {
  #[serde(default)]
  pub queue_name: String,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub count: u64,
  /// Age of the oldest message, seconds.
  #[serde(default, deserialize_with = "u64_flexible")]
  pub oldest: u64,
}

/// Quarantine counters from `/quarantine/status`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct QuarantineStatus {
  #[serde(default, deserialize_with = "u64_flexible")]
  pub spam: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub virus: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub attachment: u64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub blacklisted: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PmgNodeStatus {
  #[serde(default, deserialize_with = "f64_flexible")]
  pub cpu: f64,
  #[serde(default, deserialize_with = "u64_flexible")]
  pub uptime: u64,
}

impl ProxmoxClient {
  pub async fn mail_statistics(&self) -> Result<MailStatistics> {
    self.get("/statistics/mail").await
  }

  pub async fn domain_statistics(
    &self,
  ) -> Result<Vec<DomainStatistics>> {
    self.get("/statistics/domains").await
  }

  pub async fn postfix_queue(
    &self,
    node: &str,
  ) -> Result<Vec<PostfixQueueItem>> {
    self.get(&format!("/nodes/{node}/postfix/queue")).await
  }

  pub async fn quarantine_status(&self) -> Result<QuarantineStatus> {
    self.get("/quarantine/status").await
  }

  pub async fn pmg_node_status(
    &self,
    node: &str,
  ) -> Result<PmgNodeStatus> {
    self.get(&format!("/nodes/{node}/status")).await
  }

  /// PMG exposes the member list at the same path as PVE.
  pub async fn pmg_nodes(&self) -> Result<Vec<PmgNodeListItem>> {
    self.get("/nodes").await
  }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PmgNodeListItem {
  pub node: String,
  #[serde(default)]
  pub status: String,
}
