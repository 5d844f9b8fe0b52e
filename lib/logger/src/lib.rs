//! Thin structured-logging setup shared by the `gantry` and `gantryd`
//! binaries, mirroring the `logger::init(&config.logging)` call site
//! used by Komodo's periphery binary.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
}

impl LogLevel {
  fn as_filter_str(&self) -> &'static str {
    match self {
      LogLevel::Trace => "trace",
      LogLevel::Debug => "debug",
      LogLevel::Info => "info",
      LogLevel::Warn => "warn",
      LogLevel::Error => "error",
    }
  }
}

impl Default for LogLevel {
  fn default() -> Self {
    LogLevel::Info
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
  #[serde(default)]
  pub level: LogLevel,
  /// Human-readable multi-line output instead of single-line.
  #[serde(default)]
  pub pretty: bool,
  /// Include file:line in each event.
  #[serde(default)]
  pub location: bool,
}

/// Installs the global `tracing` subscriber. Safe to call once per
/// process; a second call is a no-op failure that is swallowed, since
/// tests may initialize logging more than once across the binary.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter_str()));

  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_file(config.location)
    .with_line_number(config.location)
    .with_target(false);

  let result = if config.pretty {
    builder.pretty().try_init()
  } else {
    builder.compact().try_init()
  };

  // A subscriber may already be installed (e.g. in tests); that's
  // fine, just keep using it.
  let _ = result;
  Ok(())
}
