use serde::{Deserialize, Serialize};

use super::InstanceKind;

/// A monitored target as configured by the operator.
/// Loaded from the (externally decrypted) instances file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Instance {
  pub kind: InstanceKind,
  /// Stable operator-chosen id. Re-adding an instance with the same
  /// id reuses all derived resource ids.
  pub id: String,
  #[serde(default)]
  pub display_name: String,
  pub credentials: InstanceCredentials,
  /// Whether to verify the target's TLS certificate chain.
  #[serde(default = "default_tls_verify")]
  pub tls_verify: bool,
  /// Pinned SHA-256 certificate fingerprints, accepted even when the
  /// chain does not verify. Hex, colon separators optional.
  #[serde(default)]
  pub tls_fingerprints: Vec<String>,
  /// Host strings. For PVE clusters this may enumerate multiple
  /// members; any member may serve any query.
  pub endpoints: Vec<String>,
}

fn default_tls_verify() -> bool {
  true
}

impl Instance {
  pub fn display_name(&self) -> &str {
    if self.display_name.is_empty() {
      &self.id
    } else {
      &self.display_name
    }
  }

  /// Exactly one auth scheme must be configured.
  pub fn validate(&self) -> anyhow::Result<()> {
    if self.endpoints.is_empty() {
      anyhow::bail!("instance '{}' has no endpoints", self.id);
    }
    match &self.credentials {
      InstanceCredentials::Password { username, password, .. } => {
        if username.is_empty() || password.is_empty() {
          anyhow::bail!(
            "instance '{}' has incomplete password credentials",
            self.id
          );
        }
      }
      InstanceCredentials::Token { token_id, secret } => {
        if token_id.is_empty() || secret.is_empty() {
          anyhow::bail!(
            "instance '{}' has incomplete token credentials",
            self.id
          );
        }
      }
    }
    Ok(())
  }
}

/// Either a password (ticket login) or an API token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceCredentials {
  Password {
    username: String,
    password: String,
    /// Auth realm, eg. `pam` or `pve`.
    #[serde(default = "default_realm")]
    realm: String,
  },
  Token {
    /// Full token id, eg. `monitor@pam!vigil`.
    token_id: String,
    secret: String,
  },
}

fn default_realm() -> String {
  String::from("pam")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn token_instance() -> Instance {
    Instance {
      kind: InstanceKind::Pve,
      id: "pve1".into(),
      display_name: String::new(),
      credentials: InstanceCredentials::Token {
        token_id: "monitor@pam!vigil".into(),
        secret: "s3cret".into(),
      },
      tls_verify: true,
      tls_fingerprints: Vec::new(),
      endpoints: vec!["10.0.0.10".into()],
    }
  }

  #[test]
  fn validate_accepts_complete_token_credentials() {
    token_instance().validate().unwrap();
  }

  #[test]
  fn validate_rejects_empty_endpoints() {
    let mut instance = token_instance();
    instance.endpoints.clear();
    assert!(instance.validate().is_err());
  }

  #[test]
  fn validate_rejects_empty_password() {
    let mut instance = token_instance();
    instance.credentials = InstanceCredentials::Password {
      username: "monitor@pam".into(),
      password: String::new(),
      realm: "pam".into(),
    };
    assert!(instance.validate().is_err());
  }

  #[test]
  fn display_name_falls_back_to_id() {
    let mut instance = token_instance();
    assert_eq!(instance.display_name(), "pve1");
    instance.display_name = "Main cluster".into();
    assert_eq!(instance.display_name(), "Main cluster");
  }
}
