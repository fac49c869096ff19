//! Component Factory - Config-driven Construction
//!
//! Selects the provider, processor and metrics server variant by the
//! `type` discriminator of each config block. The metrics server is
//! built first so the other two can push their stats into it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::info;

use crate::adapters::metrics::{EmbeddedServer, PrometheusServer, StatsRegistry};
use crate::adapters::processors::{EventBridgeProcessor, KnativeProcessor, OpenFaasProcessor};
use crate::adapters::providers::{SimulatorProvider, WebhookProvider, horizon, vcenter};
use crate::config::{
  MetricsConfig, MetricsType, ProcessorConfig, ProcessorType, ProviderConfig, ProviderType,
  RouterConfig,
};
use crate::error::RouterError;
use crate::ports::{MetricsReceiver, MetricsServer, Processor, Provider};

/// The three components the lifecycle controller runs.
pub struct Components {
  pub provider: Arc<dyn Provider>,
  pub processor: Arc<dyn Processor>,
  pub metrics: Arc<dyn MetricsServer>,
}

/// Build all components from `config`.
///
/// `registry` backs the embedded metrics server; it is unused by the
/// Prometheus variant. Provider and processor report under their own
/// names, so the two must differ.
pub fn build_components(
  config: &RouterConfig,
  registry: Arc<StatsRegistry>,
) -> Result<Components, RouterError> {
  if config.provider.name == config.processor.name {
    return Err(RouterError::Config(anyhow!(
      "provider and processor must not share the name {:?}",
      config.provider.name
    )));
  }

  let (metrics, receiver) = build_metrics(&config.metrics, registry)?;
  let root_cas = &config.certificates.root_cas;
  let processor = build_processor(&config.processor, root_cas, Arc::clone(&receiver))?;
  let provider = build_provider(&config.provider, root_cas, receiver)?;

  info!(
    provider = %config.provider.kind,
    processor = %config.processor.kind,
    metrics = %config.metrics.kind,
    "Router components ready"
  );

  Ok(Components {
    provider,
    processor,
    metrics,
  })
}

fn missing(section: &str) -> RouterError {
  RouterError::Config(anyhow!("missing [{section}] settings"))
}

/// Build the metrics server and the receiver handle components push to.
pub fn build_metrics(
  config: &MetricsConfig,
  registry: Arc<StatsRegistry>,
) -> Result<(Arc<dyn MetricsServer>, Arc<dyn MetricsReceiver>), RouterError> {
  match config.kind {
    MetricsType::Embedded => {
      let settings = config.default.as_ref().ok_or_else(|| missing("metrics.default"))?;
      let server = Arc::new(EmbeddedServer::new(settings, registry)?);
      Ok((Arc::clone(&server) as Arc<dyn MetricsServer>, server))
    }
    MetricsType::Prometheus => {
      let settings = config
        .prometheus
        .as_ref()
        .ok_or_else(|| missing("metrics.prometheus"))?;
      let server = Arc::new(PrometheusServer::new(settings)?);
      Ok((Arc::clone(&server) as Arc<dyn MetricsServer>, server))
    }
  }
}

pub fn build_provider(
  config: &ProviderConfig,
  root_cas: &[PathBuf],
  receiver: Arc<dyn MetricsReceiver>,
) -> Result<Arc<dyn Provider>, RouterError> {
  let name = config.name.as_str();
  match config.kind {
    ProviderType::Vcenter => {
      let settings = config.vcenter.as_ref().ok_or_else(|| missing("provider.vcenter"))?;
      let provider = vcenter::provider(settings, name, root_cas, receiver)
        .map_err(|e| RouterError::Construction("vcenter provider", e))?;
      Ok(Arc::new(provider))
    }
    ProviderType::Horizon => {
      let settings = config.horizon.as_ref().ok_or_else(|| missing("provider.horizon"))?;
      let provider = horizon::provider(settings, name, root_cas, receiver)
        .map_err(|e| RouterError::Construction("horizon provider", e))?;
      Ok(Arc::new(provider))
    }
    ProviderType::Webhook => {
      let settings = config.webhook.as_ref().ok_or_else(|| missing("provider.webhook"))?;
      Ok(Arc::new(WebhookProvider::new(settings, name, receiver)?))
    }
    ProviderType::Vcsim => {
      let settings = config.vcsim.as_ref().ok_or_else(|| missing("provider.vcsim"))?;
      Ok(Arc::new(SimulatorProvider::new(settings, name, receiver)?))
    }
  }
}

pub fn build_processor(
  config: &ProcessorConfig,
  root_cas: &[PathBuf],
  receiver: Arc<dyn MetricsReceiver>,
) -> Result<Arc<dyn Processor>, RouterError> {
  let name = config.name.as_str();
  match config.kind {
    ProcessorType::Openfaas => {
      let settings = config.openfaas.as_ref().ok_or_else(|| missing("processor.openfaas"))?;
      Ok(Arc::new(OpenFaasProcessor::new(settings, name, root_cas, receiver)?))
    }
    ProcessorType::AwsEventBridge => {
      let settings = config
        .aws_event_bridge
        .as_ref()
        .ok_or_else(|| missing("processor.aws_event_bridge"))?;
      Ok(Arc::new(EventBridgeProcessor::new(settings, name, root_cas, receiver)?))
    }
    ProcessorType::Knative => {
      let settings = config.knative.as_ref().ok_or_else(|| missing("processor.knative"))?;
      Ok(Arc::new(KnativeProcessor::new(settings, name, root_cas, receiver)?))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::loader::parse_config;

  const BASE: &str = r#"
[provider]
type = "vcsim"
name = "sim"
[provider.vcsim]
interval_ms = 10

[processor]
type = "knative"
name = "broker"
[processor.knative]
sink = "http://127.0.0.1:1/"

[metrics]
type = "default"
name = "metrics"
[metrics.default]
bind_address = "127.0.0.1:0"
"#;

  #[tokio::test]
  async fn test_builds_each_variant() {
    let config = parse_config(BASE).unwrap();
    let components = build_components(&config, Arc::new(StatsRegistry::new()));
    assert!(components.is_ok());

    let prometheus: MetricsConfig = toml::from_str(
      r#"
type = "prometheus"
name = "prom"
[prometheus]
bind_address = "127.0.0.1:0"
"#,
    )
    .unwrap();
    assert!(build_metrics(&prometheus, Arc::new(StatsRegistry::new())).is_ok());
  }

  #[tokio::test]
  async fn test_missing_block_is_config_error() {
    let mut config = parse_config(BASE).unwrap();
    config.processor.kind = ProcessorType::Openfaas;

    let err = build_components(&config, Arc::new(StatsRegistry::new()))
      .err()
      .unwrap();
    assert!(matches!(err, RouterError::Config(_)));
    assert!(err.to_string().contains("processor.openfaas"));
  }

  #[tokio::test]
  async fn test_bad_sink_is_construction_error() {
    let mut config = parse_config(BASE).unwrap();
    if let Some(knative) = config.processor.knative.as_mut() {
      knative.sink = "not a url".to_string();
    }

    let err = build_components(&config, Arc::new(StatsRegistry::new()))
      .err()
      .unwrap();
    assert!(matches!(err, RouterError::Construction("knative processor", _)));
  }

  #[tokio::test]
  async fn test_shared_name_is_config_error() {
    let mut config = parse_config(BASE).unwrap();
    config.processor.name = config.provider.name.clone();

    let err = build_components(&config, Arc::new(StatsRegistry::new()))
      .err()
      .unwrap();
    assert!(matches!(err, RouterError::Config(_)));
  }

  const BASIC_AUTH: &str = r#"
[auth.basic_auth]
username = "administrator@vsphere.local"
password = "secret"
"#;

  /// (type, valid settings, invalid settings) per provider type.
  fn provider_cases() -> Vec<(&'static str, String, String)> {
    let nested = |section: &str| BASIC_AUTH.replace("[auth.", &format!("[{section}.auth."));
    vec![
      (
        "vcenter",
        format!("[vcenter]\naddress = \"https://vcenter.local\"\n{}", nested("vcenter")),
        // session login needs credentials
        "[vcenter]\naddress = \"https://vcenter.local\"\n".to_string(),
      ),
      (
        "horizon",
        format!(
          "[horizon]\naddress = \"https://horizon.local\"\ndomain = \"corp\"\n{}",
          nested("horizon")
        ),
        format!(
          "[horizon]\naddress = \"ftp://horizon.local\"\ndomain = \"corp\"\n{}",
          nested("horizon")
        ),
      ),
      (
        "webhook",
        "[webhook]\nbind_address = \"127.0.0.1:0\"\npath = \"/webhook\"\n".to_string(),
        "[webhook]\nbind_address = \"127.0.0.1:0\"\npath = \"webhook\"\n".to_string(),
      ),
      (
        "vcsim",
        "[vcsim]\ninterval_ms = 10\n".to_string(),
        String::new(),
      ),
    ]
  }

  /// (type, valid settings, invalid settings) per processor type.
  fn processor_cases() -> Vec<(&'static str, String, String)> {
    let bridge = |secret: &str| {
      format!(
        "[aws_event_bridge]\nregion = \"us-west-2\"\naccess_key_id = \"AKIDEXAMPLE\"\nsecret_access_key = \"{secret}\"\n"
      )
    };
    vec![
      (
        "openfaas",
        "[openfaas]\naddress = \"http://gateway.openfaas:8080\"\n".to_string(),
        "[openfaas]\naddress = \"gateway.openfaas\"\n".to_string(),
      ),
      ("aws_event_bridge", bridge("wJalrXUtnFEMI"), bridge("")),
      (
        "knative",
        "[knative]\nsink = \"http://broker.local/\"\n".to_string(),
        "[knative]\nsink = \"ftp://broker.local\"\n".to_string(),
      ),
    ]
  }

  fn is_rejection(err: &RouterError) -> bool {
    matches!(err, RouterError::Construction(..) | RouterError::Config(_))
  }

  #[tokio::test]
  async fn test_every_provider_type_builds_or_rejects() {
    let registry = Arc::new(StatsRegistry::new());
    for (kind, valid, invalid) in provider_cases() {
      let config: ProviderConfig =
        toml::from_str(&format!("type = \"{kind}\"\nname = \"source\"\n{valid}")).unwrap();
      let built = build_provider(&config, &[], Arc::clone(&registry) as Arc<dyn MetricsReceiver>);
      assert!(built.is_ok(), "{kind}: {:?}", built.err());

      let config: ProviderConfig =
        toml::from_str(&format!("type = \"{kind}\"\nname = \"source\"\n{invalid}")).unwrap();
      let err = build_provider(&config, &[], Arc::clone(&registry) as Arc<dyn MetricsReceiver>)
        .err()
        .unwrap_or_else(|| panic!("{kind}: invalid settings were accepted"));
      assert!(is_rejection(&err), "{kind}: {err:?}");
    }
  }

  #[tokio::test]
  async fn test_every_processor_type_builds_or_rejects() {
    let registry = Arc::new(StatsRegistry::new());
    for (kind, valid, invalid) in processor_cases() {
      let config: ProcessorConfig =
        toml::from_str(&format!("type = \"{kind}\"\nname = \"sink\"\n{valid}")).unwrap();
      let built = build_processor(&config, &[], Arc::clone(&registry) as Arc<dyn MetricsReceiver>);
      assert!(built.is_ok(), "{kind}: {:?}", built.err());

      let config: ProcessorConfig =
        toml::from_str(&format!("type = \"{kind}\"\nname = \"sink\"\n{invalid}")).unwrap();
      let err = build_processor(&config, &[], Arc::clone(&registry) as Arc<dyn MetricsReceiver>)
        .err()
        .unwrap_or_else(|| panic!("{kind}: invalid settings were accepted"));
      assert!(is_rejection(&err), "{kind}: {err:?}");
    }
  }
}
