//! Prometheus Metrics Server - Pull-scrapeable Router Metrics
//!
//! Translates every pushed `EventStats` snapshot into labelled gauges
//! and exposes them at `GET /metrics` in the text exposition format.
//! Gauges are *set* from each snapshot, so the latest push for a
//! component always wins.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::adapters::http::{HTTP_TIMEOUT, serve_until_cancelled, with_timeout};
use crate::config::PrometheusMetricsConfig;
use crate::domain::{EventStats, StatsKind};
use crate::error::RouterError;
use crate::ports::{MetricsReceiver, MetricsServer};

/// Path of the exposition endpoint.
pub const METRICS_ENDPOINT: &str = "/metrics";

/// Prometheus variant of the metrics server.
///
/// All metrics follow the naming convention `event_router_*` and are
/// labelled with the reporting component's name.
pub struct PrometheusServer {
    /// Configured listen address.
    bind_address: SocketAddr,
    /// Prometheus registry.
    registry: Registry,
    /// Events received per provider.
    provider_events: IntGaugeVec,
    /// Events per provider that could not be handed off.
    provider_errors: IntGaugeVec,
    /// Provider throughput over the last push interval.
    provider_rate: GaugeVec,
    /// Processor invocations by category and outcome.
    processor_invocations: IntGaugeVec,
    /// Component start time (Unix seconds).
    started: GaugeVec,
}

impl PrometheusServer {
    /// Create and register all Prometheus metrics.
    pub fn new(config: &PrometheusMetricsConfig) -> Result<Self, RouterError> {
        Self::build(config).map_err(|e| RouterError::Construction("prometheus metrics server", e))
    }

    fn build(config: &PrometheusMetricsConfig) -> anyhow::Result<Self> {
        let bind_address = config
            .bind_address
            .parse::<SocketAddr>()
            .with_context(|| format!("could not validate bind address {:?}", config.bind_address))?;

        let registry = Registry::new();

        let provider_events = IntGaugeVec::new(
            Opts::new(
                "event_router_provider_events",
                "Events received by the provider since start",
            ),
            &["name", "address"],
        )?;

        let provider_errors = IntGaugeVec::new(
            Opts::new(
                "event_router_provider_events_errored",
                "Events the provider could not hand to the processor",
            ),
            &["name", "address"],
        )?;

        let provider_rate = GaugeVec::new(
            Opts::new(
                "event_router_provider_events_per_second",
                "Provider throughput over the last push interval",
            ),
            &["name", "address"],
        )?;

        let processor_invocations = IntGaugeVec::new(
            Opts::new(
                "event_router_processor_invocations",
                "Processor invocations by event category and outcome",
            ),
            &["name", "address", "category", "outcome"],
        )?;

        let started = GaugeVec::new(
            Opts::new(
                "event_router_component_started_seconds",
                "Start time of the reporting component (Unix seconds)",
            ),
            &["name", "type"],
        )?;

        registry.register(Box::new(provider_events.clone()))?;
        registry.register(Box::new(provider_errors.clone()))?;
        registry.register(Box::new(provider_rate.clone()))?;
        registry.register(Box::new(processor_invocations.clone()))?;
        registry.register(Box::new(started.clone()))?;

        Ok(Self {
            bind_address,
            registry,
            provider_events,
            provider_errors,
            provider_rate,
            processor_invocations,
            started,
        })
    }

    pub const fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Render all registered metrics in the text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        encode_registry(&self.registry)
    }

    pub fn router(&self) -> Router {
        let app = Router::new()
            .route(METRICS_ENDPOINT, get(metrics_handler))
            .with_state(self.registry.clone());
        with_timeout(app, HTTP_TIMEOUT)
    }

    /// Serve on an already bound listener until `cancel` fires.
    #[instrument(skip_all)]
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), RouterError> {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %format!("http://{addr}{METRICS_ENDPOINT}"), "starting prometheus metrics server");
        }

        serve_until_cancelled(listener, self.router(), cancel)
            .await
            .context("could not run prometheus metrics server")
            .map_err(RouterError::Metrics)
    }
}

fn encode_registry(registry: &Registry) -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("could not encode metrics")?;
    String::from_utf8(buffer).context("metrics are not valid UTF-8")
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    match encode_registry(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "could not render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl MetricsReceiver for PrometheusServer {
    fn process(&self, name: &str, stats: &EventStats) {
        let address = stats.address();
        let kind = stats.kind().to_string();

        #[allow(clippy::cast_precision_loss)]
        let started = stats.started().timestamp_millis() as f64 / 1000.0;
        self.started.with_label_values(&[name, &kind]).set(started);

        match stats.kind() {
            StatsKind::Provider => {
                let labels = [name, address];
                if let Some(total) = stats.events_total() {
                    self.provider_events
                        .with_label_values(&labels)
                        .set(saturating_i64(total));
                }
                if let Some(errored) = stats.events_err() {
                    self.provider_errors
                        .with_label_values(&labels)
                        .set(saturating_i64(errored));
                }
                if let Some(rate) = stats.events_per_sec() {
                    self.provider_rate.with_label_values(&labels).set(rate);
                }
            }
            StatsKind::Processor => {
                for (category, details) in stats.invocations().into_iter().flatten() {
                    self.processor_invocations
                        .with_label_values(&[name, address, category.as_str(), "success"])
                        .set(saturating_i64(details.success_count));
                    self.processor_invocations
                        .with_label_values(&[name, address, category.as_str(), "failure"])
                        .set(saturating_i64(details.failure_count));
                }
            }
        }
    }
}

#[async_trait]
impl MetricsServer for PrometheusServer {
    async fn run(&self, cancel: CancellationToken) -> Result<(), RouterError> {
        let listener = TcpListener::bind(self.bind_address)
            .await
            .with_context(|| format!("could not bind prometheus metrics server to {}", self.bind_address))
            .map_err(RouterError::Metrics)?;

        self.serve(listener, cancel).await
    }
}
