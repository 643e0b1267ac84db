use serde::{Deserialize, Serialize};

/// How verbose the subscriber should be. Mirrors [`tracing::Level`]
/// without requiring callers (eg config-loading crates) to depend on
/// `tracing` just to describe a log level in a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
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

/// Which stdio formatter, if any, to layer onto the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdioLogMode {
  /// Human-readable, one line per event.
  #[default]
  Standard,
  /// One JSON object per event, for log aggregators.
  Json,
  /// No stdio layer at all (eg when only OTLP export is desired).
  None,
}

/// Everything [`crate::init`] needs to configure the process-wide
/// `tracing` subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  pub level: LogLevel,
  pub stdio: StdioLogMode,
  /// Use `tracing_subscriber`'s multi-line "pretty" formatter instead
  /// of the compact one-line formatter. Ignored when `stdio` is
  /// `Json`.
  pub pretty: bool,
  /// Include the source file/line on each event.
  pub location: bool,
  /// Enable ANSI color codes in stdio output.
  pub ansi: bool,
  /// OTLP collector endpoint. Empty string disables OpenTelemetry
  /// export entirely.
  pub otlp_endpoint: String,
  pub opentelemetry_service_name: String,
  pub opentelemetry_scope_name: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: LogLevel::default(),
      stdio: StdioLogMode::default(),
      pretty: false,
      location: false,
      ansi: true,
      otlp_endpoint: String::new(),
      opentelemetry_service_name: "throttler".to_string(),
      opentelemetry_scope_name: "throttler".to_string(),
    }
  }
}
