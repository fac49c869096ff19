//! Command Line - Arguments and Logging Setup

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Default location of the router configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vmware-event-router/config.toml";

/// Log verbosity accepted on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl LogLevel {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Trace => "trace",
      Self::Debug => "debug",
      Self::Info => "info",
      Self::Warn => "warn",
      Self::Error => "error",
    }
  }
}

/// Route events from one provider to one processor.
#[derive(Parser, Debug, Clone)]
#[command(name = "event-router", version, about)]
pub struct Args {
  /// Path to the TOML configuration file
  #[arg(short, long, env = "ROUTER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
  pub config: PathBuf,

  /// Log verbosity (RUST_LOG takes precedence when set)
  #[arg(long, env = "ROUTER_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
  pub log_level: LogLevel,

  /// Emit structured JSON logs
  #[arg(long, env = "ROUTER_LOG_JSON")]
  pub log_json: bool,
}

/// Install the global tracing subscriber.
pub fn init_tracing(args: &Args) -> Result<()> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));

  let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
  if args.log_json {
    builder
      .json()
      .try_init()
      .map_err(|e| anyhow::anyhow!(e))
      .context("could not install JSON logger")
  } else {
    builder
      .try_init()
      .map_err(|e| anyhow::anyhow!(e))
      .context("could not install logger")
  }
}
