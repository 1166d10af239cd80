use serde::{Deserialize, Serialize};

/// An api token as persisted in `api_tokens.json`. Only the SHA-256
/// of the secret is stored; the plain secret is shown once at
/// creation and never kept.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiToken {
  pub id: String,
  #[serde(default)]
  pub name: String,
  /// Hex SHA-256 of the token secret.
  pub hashed_secret: String,
  pub created_at: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_used: Option<i64>,
  #[serde(default)]
  pub disabled: bool,
}
