use async_timing_util::unix_timestamp_ms;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

pub mod alert;
pub mod api_token;
pub mod backup;
pub mod config;
pub mod docker;
pub mod guest;
pub mod ids;
pub mod instance;
pub mod logger;
pub mod node;
pub mod pbs;
pub mod pmg;
pub mod storage;

/// Unix timestamp in milliseconds.
pub fn vigil_timestamp() -> i64 {
  unix_timestamp_ms() as i64
}

/// The kinds of monitored targets.
#[derive(
  Serialize,
  Deserialize,
  Debug,
  Display,
  EnumString,
  AsRefStr,
  Hash,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstanceKind {
  #[default]
  Pve,
  Pbs,
  Pmg,
  DockerAgent,
}

/// Rolled up reachability of a monitored instance.
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
pub enum ConnectionState {
  /// Polls are succeeding.
  Online,
  /// Reachable but impaired, eg. auth failures or a cluster
  /// member down while quorum holds.
  Degraded,
  /// Unreachable, or scheduling stopped on a fatal config error.
  #[default]
  Offline,
}

/// Per instance health surfaced to clients, including the breaker
/// view so operators can see when the next attempt will happen.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConnectionHealth {
  pub state: ConnectionState,
  /// Timestamp of last successful poll, 0 when never.
  #[serde(default)]
  pub last_success: i64,
  /// Timestamp of last failed poll, 0 when never.
  #[serde(default)]
  pub last_error: i64,
  /// Message of the last error, if any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  /// Circuit breaker state: closed / open / half_open.
  #[serde(default)]
  pub breaker_state: String,
  /// When the breaker will next allow a call, 0 when closed.
  #[serde(default)]
  pub next_retry: i64,
}

pub fn optional_string(string: &str) -> Option<String> {
  if string.is_empty() {
    None
  } else {
    Some(string.to_string())
  }
}
