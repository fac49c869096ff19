//! Configuration Loader - File Loading and Validation
//!
//! Handles loading the router's TOML document, validating that the
//! selected provider/processor/metrics types have their settings, and
//! providing clear error messages for misconfiguration.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{
  AuthConfig, MetricsType, ProcessorType, ProviderType, RouterConfig,
};

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails (including unknown `type` values)
/// - Validation rules are violated
pub fn load_config(path: &Path) -> Result<RouterConfig> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("could not open configuration file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    path = %path.display(),
    provider = %config.provider.kind,
    processor = %config.processor.kind,
    metrics = %config.metrics.kind,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<RouterConfig> {
  let config: RouterConfig =
    toml::from_str(content).context("could not parse configuration file")?;

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - A settings table matching every `type` discriminator
/// - Non-empty names and addresses
/// - Distinct provider and processor names (they key the stats store)
/// - Parseable bind addresses
/// - Non-empty basic auth usernames
fn validate_config(config: &RouterConfig) -> Result<()> {
  validate_provider(config)?;
  validate_processor(config)?;
  validate_metrics(config)?;
  anyhow::ensure!(
    config.provider.name != config.processor.name,
    "provider and processor must not share the name {:?}",
    config.provider.name
  );
  Ok(())
}

fn validate_provider(config: &RouterConfig) -> Result<()> {
  let provider = &config.provider;
  anyhow::ensure!(!provider.name.is_empty(), "provider name must not be empty");

  let missing = || format!("no configuration for provider type {:?} found", provider.kind.to_string());

  match provider.kind {
    ProviderType::Vcenter => {
      let vc = provider.vcenter.as_ref().with_context(missing)?;
      anyhow::ensure!(!vc.address.is_empty(), "vcenter address must not be empty");
      anyhow::ensure!(vc.poll_interval_ms > 0, "vcenter poll_interval_ms must be positive");
      validate_auth(vc.auth.as_ref(), "vcenter")?;
    }
    ProviderType::Webhook => {
      let webhook = provider.webhook.as_ref().with_context(missing)?;
      validate_bind_address(&webhook.bind_address, "webhook")?;
      anyhow::ensure!(
        webhook.path.starts_with('/'),
        "webhook path must start with '/', got {:?}",
        webhook.path
      );
      validate_auth(webhook.auth.as_ref(), "webhook")?;
    }
    ProviderType::Horizon => {
      let horizon = provider.horizon.as_ref().with_context(missing)?;
      anyhow::ensure!(!horizon.address.is_empty(), "horizon address must not be empty");
      anyhow::ensure!(!horizon.domain.is_empty(), "horizon domain must not be empty");
      anyhow::ensure!(horizon.poll_interval_ms > 0, "horizon poll_interval_ms must be positive");
      validate_auth(horizon.auth.as_ref(), "horizon")?;
    }
    ProviderType::Vcsim => {
      let sim = provider.vcsim.as_ref().with_context(missing)?;
      anyhow::ensure!(!sim.address.is_empty(), "vcsim address must not be empty");
    }
  }

  Ok(())
}

fn validate_processor(config: &RouterConfig) -> Result<()> {
  let processor = &config.processor;
  anyhow::ensure!(!processor.name.is_empty(), "processor name must not be empty");

  let missing = || format!("no configuration for processor type {:?} found", processor.kind.to_string());

  match processor.kind {
    ProcessorType::Openfaas => {
      let faas = processor.openfaas.as_ref().with_context(missing)?;
      anyhow::ensure!(!faas.address.is_empty(), "openfaas address must not be empty");
      validate_auth(faas.auth.as_ref(), "openfaas")?;
    }
    ProcessorType::AwsEventBridge => {
      let bridge = processor.aws_event_bridge.as_ref().with_context(missing)?;
      anyhow::ensure!(!bridge.region.is_empty(), "aws_event_bridge region must not be empty");
      anyhow::ensure!(!bridge.event_bus.is_empty(), "aws_event_bridge event_bus must not be empty");
      anyhow::ensure!(
        !bridge.access_key_id.is_empty() && !bridge.secret_access_key.is_empty(),
        "aws_event_bridge access_key_id and secret_access_key must be set"
      );
    }
    ProcessorType::Knative => {
      let knative = processor.knative.as_ref().with_context(missing)?;
      anyhow::ensure!(!knative.sink.is_empty(), "knative sink must not be empty");
    }
  }

  Ok(())
}

fn validate_metrics(config: &RouterConfig) -> Result<()> {
  let metrics = &config.metrics;
  anyhow::ensure!(!metrics.name.is_empty(), "metrics name must not be empty");

  match metrics.kind {
    MetricsType::Embedded => {
      let embedded = metrics
        .default
        .as_ref()
        .context("no metrics server configuration found")?;
      validate_bind_address(&embedded.bind_address, "metrics")?;
      validate_auth(embedded.auth.as_ref(), "metrics")?;
    }
    MetricsType::Prometheus => {
      let prometheus = metrics
        .prometheus
        .as_ref()
        .context("no prometheus metrics server configuration found")?;
      validate_bind_address(&prometheus.bind_address, "prometheus")?;
    }
  }

  Ok(())
}

fn validate_bind_address(address: &str, section: &str) -> Result<()> {
  address
    .parse::<SocketAddr>()
    .with_context(|| format!("{section} bind_address {address:?} is not a valid socket address"))?;
  Ok(())
}

fn validate_auth(auth: Option<&AuthConfig>, section: &str) -> Result<()> {
  if let Some(basic) = auth.and_then(AuthConfig::basic) {
    anyhow::ensure!(
      !basic.username.is_empty(),
      "{section} basic_auth username must not be empty"
    );
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINIMAL: &str = r#"
    [provider]
    type = "vcsim"
    name = "simulator"
    [provider.vcsim]
    interval_ms = 10
    max_events = 3

    [processor]
    type = "knative"
    name = "broker"
    [processor.knative]
    sink = "http://broker.local"

    [metrics]
    type = "default"
    name = "veba-metrics"
    [metrics.default]
    bind_address = "127.0.0.1:8082"
  "#;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config(Path::new("nonexistent.toml"));
    assert!(result.is_err());
  }

  #[test]
  fn test_parse_minimal_config() {
    let config = parse_config(MINIMAL).unwrap();
    assert_eq!(config.provider.kind, ProviderType::Vcsim);
    assert_eq!(config.processor.kind, ProcessorType::Knative);
    assert_eq!(config.metrics.kind, MetricsType::Embedded);

    let sim = config.provider.vcsim.unwrap();
    assert_eq!(sim.address, "simulator://local");
    assert_eq!(sim.max_events, 3);

    let knative = config.processor.knative.unwrap();
    assert_eq!(knative.encoding, crate::config::CloudEventEncoding::Binary);
    assert!(config.certificates.root_cas.is_empty());
  }

  #[test]
  fn test_unknown_provider_type_rejected() {
    let content = MINIMAL.replace(r#"type = "vcsim""#, r#"type = "kafka""#);
    let err = parse_config(&content).unwrap_err();
    assert!(format!("{err:#}").contains("kafka"));
  }

  #[test]
  fn test_missing_sub_block_rejected() {
    let content = MINIMAL.replace(r#"type = "knative""#, r#"type = "openfaas""#);
    let err = parse_config(&content).unwrap_err();
    assert!(err.to_string().contains("openfaas"));
  }

  #[test]
  fn test_invalid_bind_address_rejected() {
    let content = MINIMAL.replace("127.0.0.1:8082", "not-an-address");
    assert!(parse_config(&content).is_err());
  }

  #[test]
  fn test_metrics_auth_parsed() {
    let content = format!(
      "{MINIMAL}\n[metrics.default.auth.basic_auth]\nusername = \"admin\"\npassword = \"secret\"\n"
    );
    let config = parse_config(&content).unwrap();
    let auth = config.metrics.default.unwrap().auth.unwrap();
    let basic = auth.basic().unwrap();
    assert_eq!(basic.username, "admin");
    assert!(!format!("{basic:?}").contains("secret"));
  }

  #[test]
  fn test_shared_component_name_rejected() {
    let content = MINIMAL.replace(r#"name = "broker""#, r#"name = "simulator""#);
    let err = parse_config(&content).unwrap_err();
    assert!(err.to_string().contains("simulator"));
  }

  #[test]
  fn test_empty_username_rejected() {
    let content = format!(
      "{MINIMAL}\n[metrics.default.auth.basic_auth]\nusername = \"\"\npassword = \"secret\"\n"
    );
    assert!(parse_config(&content).is_err());
  }
}
