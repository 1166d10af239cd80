use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogConfig {
  /// Minimum level to emit.
  #[serde(default)]
  pub level: LogLevel,
  /// How to write logs to stdio.
  #[serde(default)]
  pub stdio: StdioLogMode,
  /// Pretty (multi line) formatting for the standard mode.
  #[serde(default)]
  pub pretty: bool,
  /// Include the emitting module in log lines.
  #[serde(default = "default_location")]
  pub location: bool,
  /// Ansi colors in log lines.
  #[serde(default = "default_ansi")]
  pub ansi: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    LogConfig {
      level: LogLevel::default(),
      stdio: StdioLogMode::default(),
      pretty: false,
      location: default_location(),
      ansi: default_ansi(),
    }
  }
}

fn default_location() -> bool {
  true
}

fn default_ansi() -> bool {
  true
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
  Default,
  ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl From<LogLevel> for tracing::Level {
  fn from(level: LogLevel) -> Self {
    match level {
      LogLevel::Trace => tracing::Level::TRACE,
      LogLevel::Debug => tracing::Level::DEBUG,
      LogLevel::Info => tracing::Level::INFO,
      LogLevel::Warn => tracing::Level::WARN,
      LogLevel::Error => tracing::Level::ERROR,
    }
  }
}

impl From<tracing::Level> for LogLevel {
  fn from(level: tracing::Level) -> Self {
    match level {
      tracing::Level::TRACE => LogLevel::Trace,
      tracing::Level::DEBUG => LogLevel::Debug,
      tracing::Level::INFO => LogLevel::Info,
      tracing::Level::WARN => LogLevel::Warn,
      tracing::Level::ERROR => LogLevel::Error,
    }
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
  Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}
