use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::entities::logger::{LogConfig, LogLevel};

/// Vigil core server configuration, loaded from TOML config paths
/// and overridden by `VIGIL_*` environment variables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CoreConfig {
  /// Port the api server binds to. Default: 7655.
  #[serde(default = "default_port")]
  pub port: u16,
  /// IP the api server binds to. Default: 0.0.0.0.
  #[serde(default = "default_bind_ip")]
  pub bind_ip: String,

  /// Path to the (externally decrypted) instances file.
  #[serde(default = "default_instances_path")]
  pub instances_path: PathBuf,
  /// Path to the alert configuration.
  #[serde(default = "default_alerts_path")]
  pub alerts_path: PathBuf,
  /// Path to hashed api tokens.
  #[serde(default = "default_api_tokens_path")]
  pub api_tokens_path: PathBuf,

  /// PBS polling interval in seconds. Default: 60.
  #[serde(default = "default_slow_poll_interval")]
  pub pbs_polling_interval: u64,
  /// PMG polling interval in seconds. Default: 60.
  #[serde(default = "default_slow_poll_interval")]
  pub pmg_polling_interval: u64,
  /// Upper bound on any single client call, seconds. Default: 45.
  #[serde(default = "default_connection_timeout")]
  pub connection_timeout: u64,

  /// Scale polling intervals with observed change / staleness.
  #[serde(default = "default_adaptive_polling_enabled")]
  pub adaptive_polling_enabled: bool,
  /// Floor for adaptive intervals, seconds. Default: 10.
  #[serde(default = "default_adaptive_polling_min_interval")]
  pub adaptive_polling_min_interval: u64,
  /// Ceiling for adaptive intervals, seconds. Default: 300.
  #[serde(default = "default_adaptive_polling_max_interval")]
  pub adaptive_polling_max_interval: u64,

  /// Concurrent PBS polls. Default: 8.
  #[serde(default = "default_slow_poll_concurrency")]
  pub pbs_max_concurrency: usize,
  /// Concurrent PMG polls. Default: 8.
  #[serde(default = "default_slow_poll_concurrency")]
  pub pmg_max_concurrency: usize,

  /// Consecutive failures before the circuit opens. Default: 3.
  #[serde(default = "default_breaker_open_threshold")]
  pub breaker_open_threshold: u32,
  /// Base backoff, seconds. Default: 5.
  #[serde(default = "default_breaker_retry_interval")]
  pub breaker_retry_interval: u64,
  /// Backoff cap, seconds. Default: 300.
  #[serde(default = "default_breaker_max_delay")]
  pub breaker_max_delay: u64,
  /// One half-open probe per window, seconds. Default: 30.
  #[serde(default = "default_breaker_half_open_window")]
  pub breaker_half_open_window: u64,

  /// Age at which data starts counting as stale, seconds.
  #[serde(default = "default_staleness_min")]
  pub staleness_min: u64,
  /// Age at which data is fully stale, seconds.
  #[serde(default = "default_staleness_max")]
  pub staleness_max: u64,

  /// Plain api tokens accepted in addition to the hashed token file.
  /// Intended for bootstrap / automation via `VIGIL_API_TOKENS`.
  #[serde(default)]
  pub api_tokens: Vec<String>,

  /// Allowed CORS origins. Empty allows all.
  #[serde(default)]
  pub cors_allowed_origins: Vec<String>,

  /// Auth rate limiting (failures per IP).
  #[serde(default)]
  pub auth_rate_limit_disabled: bool,
  #[serde(default = "default_auth_rate_limit_max_attempts")]
  pub auth_rate_limit_max_attempts: u32,
  #[serde(default = "default_auth_rate_limit_window_seconds")]
  pub auth_rate_limit_window_seconds: u64,

  #[serde(default)]
  pub logging: LogConfig,
  /// Pretty-print the sanitized startup config.
  #[serde(default)]
  pub pretty_startup_config: bool,

  #[serde(default)]
  pub ssl_enabled: bool,
  #[serde(default = "default_ssl_key_file")]
  pub ssl_key_file: PathBuf,
  #[serde(default = "default_ssl_cert_file")]
  pub ssl_cert_file: PathBuf,
}

impl Default for CoreConfig {
  fn default() -> Self {
    // serde defaults are the single source of truth.
    serde_json::from_str("{}").unwrap()
  }
}

impl CoreConfig {
  /// For startup logging. Token material is redacted.
  pub fn sanitized(&self) -> CoreConfig {
    let mut config = self.clone();
    config.api_tokens =
      config.api_tokens.iter().map(|_| "<redacted>".into()).collect();
    config
  }
}

fn default_port() -> u16 {
  7655
}

fn default_bind_ip() -> String {
  "0.0.0.0".to_string()
}

fn default_instances_path() -> PathBuf {
  "/etc/vigil/instances.toml".into()
}

fn default_alerts_path() -> PathBuf {
  "/etc/vigil/alerts.json".into()
}

fn default_api_tokens_path() -> PathBuf {
  "/etc/vigil/api_tokens.json".into()
}

fn default_slow_poll_interval() -> u64 {
  60
}

fn default_connection_timeout() -> u64 {
  45
}

fn default_adaptive_polling_enabled() -> bool {
  true
}

fn default_adaptive_polling_min_interval() -> u64 {
  10
}

fn default_adaptive_polling_max_interval() -> u64 {
  300
}

fn default_slow_poll_concurrency() -> usize {
  8
}

fn default_breaker_open_threshold() -> u32 {
  3
}

fn default_breaker_retry_interval() -> u64 {
  5
}

fn default_breaker_max_delay() -> u64 {
  300
}

fn default_breaker_half_open_window() -> u64 {
  30
}

fn default_staleness_min() -> u64 {
  10
}

fn default_staleness_max() -> u64 {
  300
}

fn default_auth_rate_limit_max_attempts() -> u32 {
  10
}

fn default_auth_rate_limit_window_seconds() -> u64 {
  60
}

fn default_ssl_key_file() -> PathBuf {
  "/etc/vigil/ssl/key.pem".into()
}

fn default_ssl_cert_file() -> PathBuf {
  "/etc/vigil/ssl/cert.pem".into()
}

/// `VIGIL_*` environment overrides, parsed with envy.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Env {
  #[serde(default)]
  pub vigil_config_paths: Vec<PathBuf>,
  pub vigil_port: Option<u16>,
  pub vigil_bind_ip: Option<String>,
  pub vigil_instances_path: Option<PathBuf>,
  pub vigil_alerts_path: Option<PathBuf>,
  pub vigil_api_tokens_path: Option<PathBuf>,
  pub vigil_pbs_polling_interval: Option<u64>,
  pub vigil_pmg_polling_interval: Option<u64>,
  pub vigil_connection_timeout: Option<u64>,
  pub vigil_adaptive_polling_enabled: Option<bool>,
  pub vigil_adaptive_polling_min_interval: Option<u64>,
  pub vigil_adaptive_polling_max_interval: Option<u64>,
  pub vigil_pbs_max_concurrency: Option<usize>,
  pub vigil_pmg_max_concurrency: Option<usize>,
  /// Comma separated plain tokens.
  pub vigil_api_tokens: Option<String>,
  pub vigil_auth_rate_limit_disabled: Option<bool>,
  pub vigil_logging_level: Option<LogLevel>,
  pub vigil_logging_pretty: Option<bool>,
  pub vigil_pretty_startup_config: Option<bool>,
  pub vigil_ssl_enabled: Option<bool>,
}

/// Command line arguments.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "vigil", version)]
pub struct CliArgs {
  /// Paths to config files, lowest priority first.
  #[arg(long)]
  pub config_path: Option<Vec<PathBuf>>,
  /// Override the configured log level.
  #[arg(long)]
  pub log_level: Option<LogLevel>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let config = CoreConfig::default();
    assert_eq!(config.port, 7655);
    assert_eq!(config.pbs_polling_interval, 60);
    assert_eq!(config.connection_timeout, 45);
    assert_eq!(config.breaker_open_threshold, 3);
    assert_eq!(config.breaker_retry_interval, 5);
    assert_eq!(config.breaker_max_delay, 300);
    assert_eq!(config.breaker_half_open_window, 30);
    assert_eq!(config.staleness_min, 10);
    assert_eq!(config.staleness_max, 300);
  }

  #[test]
  fn sanitized_redacts_tokens() {
    let config = CoreConfig {
      api_tokens: vec!["super-secret".into()],
      ..Default::default()
    };
    assert_eq!(config.sanitized().api_tokens, vec!["<redacted>"]);
  }
}
