use serde::{Deserialize, Serialize};
use strum::Display;

use crate::entities::vigil_timestamp;

/// A delta event streamed to websocket subscribers.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WsEvent {
  #[serde(rename = "type")]
  pub kind: WsEventKind,
  pub payload: serde_json::Value,
  /// Emission timestamp (ms).
  pub ts: i64,
}

impl WsEvent {
  pub fn new(
    kind: WsEventKind,
    payload: impl Serialize,
  ) -> anyhow::Result<WsEvent> {
    Ok(WsEvent {
      kind,
      payload: serde_json::to_value(payload)?,
      ts: vigil_timestamp(),
    })
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
  Hash,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum WsEventKind {
  /// Full world snapshot, sent once after login.
  Sync,
  NodesReplaced,
  GuestsReplaced,
  StorageReplaced,
  BackupsReplaced,
  GuestSnapshotsReplaced,
  PbsReplaced,
  PmgReplaced,
  DockerHostUpdated,
  DockerHostRemoved,
  ConnectionHealth,
  AlertRaised,
  AlertEscalated,
  AlertDeescalated,
  AlertResolved,
}

/// First message a websocket client sends after connecting.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsLoginMessage {
  /// Login with an api token.
  Token { token: String },
}

impl WsLoginMessage {
  pub fn from_json_str(json: &str) -> anyhow::Result<WsLoginMessage> {
    serde_json::from_str(json)
      .map_err(|e| anyhow::anyhow!("invalid login message | {e}"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn event_kind_serializes_kebab_case() {
    assert_eq!(
      serde_json::to_string(&WsEventKind::ConnectionHealth).unwrap(),
      "\"connection-health\""
    );
    assert_eq!(WsEventKind::AlertRaised.to_string(), "alert-raised");
  }

  #[test]
  fn login_message_parses() {
    let msg =
      WsLoginMessage::from_json_str(r#"{"type":"token","token":"t"}"#)
        .unwrap();
    let WsLoginMessage::Token { token } = msg;
    assert_eq!(token, "t");
  }
}
