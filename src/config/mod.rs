//! Configuration Module - TOML-based Router Configuration
//!
//! Loads and validates the router configuration document. The document
//! declares exactly one provider, one processor and one metrics block,
//! each selected by a `type` discriminator with a matching sub-table.
//! Connection targets and credentials live here, never in adapters.

pub mod loader;

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// Top-level router configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
  /// Upstream event source.
  pub provider: ProviderConfig,
  /// Downstream event sink.
  pub processor: ProcessorConfig,
  /// Metrics endpoint.
  pub metrics: MetricsConfig,
  /// Extra trust anchors for outbound HTTPS connections.
  #[serde(default)]
  pub certificates: CertificatesConfig,
}

// ────────────────────────────────────────────
// Provider
// ────────────────────────────────────────────

/// Supported upstream event sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
  /// vCenter event feed.
  Vcenter,
  /// Inbound CloudEvents webhook listener.
  Webhook,
  /// Horizon audit event feed.
  Horizon,
  /// Built-in event simulator (deprecated).
  Vcsim,
}

impl fmt::Display for ProviderType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Vcenter => write!(f, "vcenter"),
      Self::Webhook => write!(f, "webhook"),
      Self::Horizon => write!(f, "horizon"),
      Self::Vcsim => write!(f, "vcsim"),
    }
  }
}

/// Provider block: discriminator plus the matching settings table.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
  /// Which provider to run.
  #[serde(rename = "type")]
  pub kind: ProviderType,
  /// Unique name the provider reports its stats under.
  pub name: String,
  pub vcenter: Option<VCenterConfig>,
  pub webhook: Option<WebhookConfig>,
  pub horizon: Option<HorizonConfig>,
  pub vcsim: Option<SimulatorConfig>,
}

/// vCenter event feed settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VCenterConfig {
  /// Base URL of the vCenter server, e.g. `https://vcenter.local`.
  pub address: String,
  /// Skip TLS verification (lab setups only).
  #[serde(default)]
  pub insecure_ssl: bool,
  /// Credentials for session login.
  pub auth: Option<AuthConfig>,
  /// Delay between feed polls (milliseconds).
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
}

/// Horizon audit event feed settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HorizonConfig {
  /// Base URL of the Horizon connection server.
  pub address: String,
  /// Active Directory domain used for login.
  pub domain: String,
  /// Skip TLS verification (lab setups only).
  #[serde(default)]
  pub insecure_ssl: bool,
  /// Credentials for REST login.
  pub auth: Option<AuthConfig>,
  /// Delay between feed polls (milliseconds).
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
}

/// Webhook listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
  /// Listen address, e.g. `0.0.0.0:8080`.
  #[serde(default = "default_webhook_addr")]
  pub bind_address: String,
  /// Request path events are posted to.
  #[serde(default = "default_webhook_path")]
  pub path: String,
  /// Optional basic auth gate for inbound requests.
  pub auth: Option<AuthConfig>,
}

/// Event simulator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
  /// Address reported in stats and as event source.
  #[serde(default = "default_simulator_addr")]
  pub address: String,
  /// Delay between generated events (milliseconds).
  #[serde(default = "default_simulator_interval_ms")]
  pub interval_ms: u64,
  /// Stop after this many events (0 = never).
  #[serde(default)]
  pub max_events: u64,
}

// ────────────────────────────────────────────
// Processor
// ────────────────────────────────────────────

/// Supported downstream event sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorType {
  /// OpenFaaS function gateway.
  Openfaas,
  /// AWS EventBridge event bus.
  AwsEventBridge,
  /// Knative (or any CloudEvents HTTP) sink.
  Knative,
}

impl fmt::Display for ProcessorType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Openfaas => write!(f, "openfaas"),
      Self::AwsEventBridge => write!(f, "aws_event_bridge"),
      Self::Knative => write!(f, "knative"),
    }
  }
}

/// Processor block: discriminator plus the matching settings table.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
  /// Which processor to run.
  #[serde(rename = "type")]
  pub kind: ProcessorType,
  /// Unique name the processor reports its stats under.
  pub name: String,
  pub openfaas: Option<OpenFaasConfig>,
  pub aws_event_bridge: Option<EventBridgeConfig>,
  pub knative: Option<KnativeConfig>,
}

/// OpenFaaS gateway settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenFaasConfig {
  /// Gateway base URL, e.g. `http://gateway.openfaas:8080`.
  pub address: String,
  /// Invoke via `/async-function/` instead of `/function/`.
  #[serde(default, rename = "async")]
  pub async_invocation: bool,
  /// Gateway credentials.
  pub auth: Option<AuthConfig>,
  /// How often the topic → function map is refreshed (seconds).
  #[serde(default = "default_topic_refresh_secs")]
  pub topic_refresh_secs: u64,
}

/// AWS EventBridge settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EventBridgeConfig {
  /// AWS region, e.g. `us-west-2`.
  pub region: String,
  /// Target event bus name.
  #[serde(default = "default_event_bus")]
  pub event_bus: String,
  /// Rule the events are intended for (logged only).
  pub rule_arn: Option<String>,
  /// IAM access key id.
  pub access_key_id: String,
  /// IAM secret access key.
  pub secret_access_key: String,
  /// Endpoint override (defaults to the regional endpoint).
  pub endpoint: Option<String>,
}

/// CloudEvents HTTP binding mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudEventEncoding {
  /// Attributes in `ce-*` headers, data as body.
  #[default]
  Binary,
  /// Whole event as `application/cloudevents+json` body.
  Structured,
}

/// Knative sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct KnativeConfig {
  /// Sink URL (broker ingress, service, ...).
  pub sink: String,
  /// HTTP binding mode.
  #[serde(default)]
  pub encoding: CloudEventEncoding,
  /// Skip TLS verification (lab setups only).
  #[serde(default)]
  pub insecure_ssl: bool,
}

// ────────────────────────────────────────────
// Metrics
// ────────────────────────────────────────────

/// Supported metrics servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsType {
  /// Embedded JSON stats endpoint.
  #[serde(rename = "default")]
  Embedded,
  /// Prometheus exposition endpoint.
  Prometheus,
}

impl fmt::Display for MetricsType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Embedded => write!(f, "default"),
      Self::Prometheus => write!(f, "prometheus"),
    }
  }
}

/// Metrics block: discriminator plus the matching settings table.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Which metrics server to run.
  #[serde(rename = "type")]
  pub kind: MetricsType,
  /// Identifier of the metrics server.
  pub name: String,
  pub default: Option<EmbeddedMetricsConfig>,
  pub prometheus: Option<PrometheusMetricsConfig>,
}

/// Embedded stats endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedMetricsConfig {
  /// Listen address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Optional basic auth gate.
  pub auth: Option<AuthConfig>,
}

/// Prometheus endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusMetricsConfig {
  /// Listen address.
  #[serde(default = "default_prometheus_addr")]
  pub bind_address: String,
}

// ────────────────────────────────────────────
// Shared
// ────────────────────────────────────────────

/// Authentication section. Only basic auth is supported.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
  pub basic_auth: Option<BasicAuthConfig>,
}

/// Username/password pair.
#[derive(Clone, Deserialize)]
pub struct BasicAuthConfig {
  pub username: String,
  pub password: String,
}

impl fmt::Debug for BasicAuthConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BasicAuthConfig")
      .field("username", &self.username)
      .field("password", &"***")
      .finish()
  }
}

impl AuthConfig {
  /// Basic auth credentials, if configured.
  pub const fn basic(&self) -> Option<&BasicAuthConfig> {
    self.basic_auth.as_ref()
  }
}

/// Root certificate bundles trusted by outbound HTTPS clients.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificatesConfig {
  /// PEM files to add to the trust store.
  #[serde(default)]
  pub root_cas: Vec<PathBuf>,
}

// Default value functions for serde

fn default_poll_interval_ms() -> u64 {
  1000
}

fn default_webhook_addr() -> String {
  "0.0.0.0:8080".to_string()
}

fn default_webhook_path() -> String {
  "/webhook".to_string()
}

fn default_simulator_addr() -> String {
  "simulator://local".to_string()
}

fn default_simulator_interval_ms() -> u64 {
  1000
}

fn default_topic_refresh_secs() -> u64 {
  30
}

fn default_event_bus() -> String {
  "default".to_string()
}

fn default_metrics_addr() -> String {
  "0.0.0.0:8082".to_string()
}

fn default_prometheus_addr() -> String {
  "0.0.0.0:9090".to_string()
}
