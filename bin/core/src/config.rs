use std::{path::PathBuf, sync::OnceLock};

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use config::ConfigLoader;
use vigil_client::entities::{
  alert::AlertsConfig,
  api_token::ApiToken,
  config::core::{CliArgs, CoreConfig, Env},
  instance::Instance,
};

pub fn cli_args() -> &'static CliArgs {
  static CLI_ARGS: OnceLock<CliArgs> = OnceLock::new();
  CLI_ARGS.get_or_init(CliArgs::parse)
}

pub fn core_config() -> &'static CoreConfig {
  static CORE_CONFIG: OnceLock<CoreConfig> = OnceLock::new();
  CORE_CONFIG.get_or_init(|| {
    let env: Env = envy::from_env()
      .expect("failed to parse Vigil environment");
    let args = cli_args();

    let config_paths = args
      .config_path
      .as_ref()
      .unwrap_or(&env.vigil_config_paths);

    let config = if config_paths.is_empty() {
      println!(
        "{}: No config paths found, using default config",
        "INFO".green(),
      );
      CoreConfig::default()
    } else {
      (ConfigLoader {
        paths: &config_paths
          .iter()
          .map(PathBuf::as_path)
          .collect::<Vec<_>>(),
        merge_nested: true,
        extend_array: false,
        debug_print: false,
      })
      .load()
      .expect("failed at parsing config from paths")
    };

    let mut api_tokens = config.api_tokens;
    if let Some(tokens) = env.vigil_api_tokens {
      api_tokens.extend(
        tokens
          .split(',')
          .map(str::trim)
          .filter(|t| !t.is_empty())
          .map(String::from),
      );
    }

    CoreConfig {
      port: env.vigil_port.unwrap_or(config.port),
      bind_ip: env.vigil_bind_ip.unwrap_or(config.bind_ip),
      instances_path: env
        .vigil_instances_path
        .unwrap_or(config.instances_path),
      alerts_path: env
        .vigil_alerts_path
        .unwrap_or(config.alerts_path),
      api_tokens_path: env
        .vigil_api_tokens_path
        .unwrap_or(config.api_tokens_path),
      pbs_polling_interval: env
        .vigil_pbs_polling_interval
        .unwrap_or(config.pbs_polling_interval),
      pmg_polling_interval: env
        .vigil_pmg_polling_interval
        .unwrap_or(config.pmg_polling_interval),
      connection_timeout: env
        .vigil_connection_timeout
        .unwrap_or(config.connection_timeout),
      adaptive_polling_enabled: env
        .vigil_adaptive_polling_enabled
        .unwrap_or(config.adaptive_polling_enabled),
      adaptive_polling_min_interval: env
        .vigil_adaptive_polling_min_interval
        .unwrap_or(config.adaptive_polling_min_interval),
      adaptive_polling_max_interval: env
        .vigil_adaptive_polling_max_interval
        .unwrap_or(config.adaptive_polling_max_interval),
      pbs_max_concurrency: env
        .vigil_pbs_max_concurrency
        .unwrap_or(config.pbs_max_concurrency),
      pmg_max_concurrency: env
        .vigil_pmg_max_concurrency
        .unwrap_or(config.pmg_max_concurrency),
      api_tokens,
      auth_rate_limit_disabled: env
        .vigil_auth_rate_limit_disabled
        .unwrap_or(config.auth_rate_limit_disabled),
      auth_rate_limit_max_attempts: config
        .auth_rate_limit_max_attempts,
      auth_rate_limit_window_seconds: config
        .auth_rate_limit_window_seconds,
      breaker_open_threshold: config.breaker_open_threshold,
      breaker_retry_interval: config.breaker_retry_interval,
      breaker_max_delay: config.breaker_max_delay,
      breaker_half_open_window: config.breaker_half_open_window,
      staleness_min: config.staleness_min,
      staleness_max: config.staleness_max,
      cors_allowed_origins: config.cors_allowed_origins,
      logging: vigil_client::entities::logger::LogConfig {
        level: args
          .log_level
          .or(env.vigil_logging_level)
          .unwrap_or(config.logging.level),
        stdio: config.logging.stdio,
        pretty: env
          .vigil_logging_pretty
          .unwrap_or(config.logging.pretty),
        location: config.logging.location,
        ansi: config.logging.ansi,
      },
      pretty_startup_config: env
        .vigil_pretty_startup_config
        .unwrap_or(config.pretty_startup_config),
      ssl_enabled: env
        .vigil_ssl_enabled
        .unwrap_or(config.ssl_enabled),
      ssl_key_file: config.ssl_key_file,
      ssl_cert_file: config.ssl_cert_file,
    }
  })
}

/// The instances file is written (encrypted) by the external
/// persistence layer; the core consumes the decrypted TOML.
pub fn load_instances(
  path: &std::path::Path,
) -> anyhow::Result<Vec<Instance>> {
  #[derive(serde::Deserialize, Default)]
  struct InstancesFile {
    #[serde(default)]
    instances: Vec<Instance>,
  }
  if !path.exists() {
    tracing::warn!(
      "no instances file at {path:?}, starting with none"
    );
    return Ok(Vec::new());
  }
  let contents = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read {path:?}"))?;
  let file: InstancesFile = toml::from_str(&contents)
    .with_context(|| format!("invalid instances file {path:?}"))?;
  for instance in &file.instances {
    instance.validate()?;
  }
  Ok(file.instances)
}

pub fn load_alerts_config(
  path: &std::path::Path,
) -> anyhow::Result<AlertsConfig> {
  if !path.exists() {
    return Ok(AlertsConfig::default());
  }
  let contents = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read {path:?}"))?;
  serde_json::from_str(&contents)
    .with_context(|| format!("invalid alerts config {path:?}"))
}

pub fn load_api_tokens(
  path: &std::path::Path,
) -> anyhow::Result<Vec<ApiToken>> {
  if !path.exists() {
    return Ok(Vec::new());
  }
  let contents = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read {path:?}"))?;
  serde_json::from_str(&contents)
    .with_context(|| format!("invalid api tokens file {path:?}"))
}
