use std::{collections::HashSet, sync::Arc};

use anyhow::Context;
use rate_limit::RateLimiter;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use vigil_client::entities::{
  api_token::ApiToken, config::core::CoreConfig, instance::Instance,
};

use crate::{
  alert::AlertManager,
  config::{load_alerts_config, load_api_tokens, load_instances},
  docker::DockerChannel,
  monitor::{ConfigChange, Monitor, MonitorSettings},
  store::Store,
};

/// Everything the api layer needs, wired once at startup and passed
/// to handlers as axum state. Tests construct the pieces directly
/// with in-memory configuration.
pub struct App {
  pub config: &'static CoreConfig,
  pub store: Arc<Store>,
  pub alerts: Arc<AlertManager>,
  pub docker: Arc<DockerChannel>,
  pub monitor: Arc<Monitor>,
  pub tokens: TokenStore,
  pub auth_limiter: RateLimiter,
  pub config_tx: mpsc::Sender<ConfigChange>,
}

impl App {
  /// Build the service graph and return the initial instance set
  /// plus the config change receiver for [Monitor::run].
  pub fn initialize(
    config: &'static CoreConfig,
  ) -> anyhow::Result<(
    Arc<App>,
    Vec<Instance>,
    mpsc::Receiver<ConfigChange>,
  )> {
    let instances = load_instances(&config.instances_path)
      .context("failed to load instances")?;
    let alerts_config = load_alerts_config(&config.alerts_path)
      .context("failed to load alert configuration")?;
    let api_tokens = load_api_tokens(&config.api_tokens_path)
      .context("failed to load api tokens")?;

    let store = Arc::new(Store::default());
    let alerts =
      Arc::new(AlertManager::new(alerts_config, store.events()));
    let docker = Arc::new(DockerChannel::new(store.clone()));
    let monitor = Monitor::new(
      store.clone(),
      alerts.clone(),
      MonitorSettings::from(config),
    );
    let tokens = TokenStore::new(&api_tokens, &config.api_tokens);
    let auth_limiter = RateLimiter::new(
      config.auth_rate_limit_disabled,
      config.auth_rate_limit_max_attempts as usize,
      config.auth_rate_limit_window_seconds,
    );

    let (config_tx, config_rx) = mpsc::channel(16);

    let app = Arc::new(App {
      config,
      store,
      alerts,
      docker,
      monitor,
      tokens,
      auth_limiter,
      config_tx,
    });
    Ok((app, instances, config_rx))
  }
}

/// Constant-size membership check over hashed tokens. Plain tokens
/// from the environment are hashed on the way in, so memory never
/// holds usable secrets after startup.
pub struct TokenStore {
  hashes: HashSet<String>,
}

pub fn hash_token(token: &str) -> String {
  hex::encode(Sha256::digest(token.as_bytes()))
}

impl TokenStore {
  pub fn new(
    tokens: &[ApiToken],
    plain_tokens: &[String],
  ) -> TokenStore {
    let mut hashes: HashSet<String> = tokens
      .iter()
      .filter(|t| !t.disabled)
      .map(|t| t.hashed_secret.to_ascii_lowercase())
      .collect();
    hashes
      .extend(plain_tokens.iter().map(|t| hash_token(t)));
    TokenStore { hashes }
  }

  pub fn check(&self, token: &str) -> bool {
    !token.is_empty() && self.hashes.contains(&hash_token(token))
  }

  pub fn is_empty(&self) -> bool {
    self.hashes.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_and_hashed_tokens_both_check() {
    let hashed = ApiToken {
      id: "t1".into(),
      name: "agent".into(),
      hashed_secret: hash_token("hashed-secret"),
      created_at: 0,
      last_used: None,
      disabled: false,
    };
    let disabled = ApiToken {
      id: "t2".into(),
      hashed_secret: hash_token("disabled-secret"),
      disabled: true,
      ..hashed.clone()
    };
    let store = TokenStore::new(
      &[hashed, disabled],
      &["plain-secret".to_string()],
    );
    assert!(store.check("hashed-secret"));
    assert!(store.check("plain-secret"));
    assert!(!store.check("disabled-secret"));
    assert!(!store.check("wrong"));
    assert!(!store.check(""));
  }
}
