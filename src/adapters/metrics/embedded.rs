//! Embedded Metrics Server - JSON Stats Endpoint
//!
//! Exposes every pushed `EventStats` snapshot plus host telemetry at
//! `GET /stats`. When credentials are configured the endpoint sits
//! behind basic auth; otherwise it is open and a warning is logged.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::{Router, middleware};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::load::read_load_avg;
use super::registry::StatsRegistry;
use crate::adapters::http::{
    BasicCredentials, HTTP_TIMEOUT, require_basic_auth, serve_until_cancelled, with_timeout,
};
use crate::config::EmbeddedMetricsConfig;
use crate::domain::EventStats;
use crate::error::RouterError;
use crate::ports::{MetricsReceiver, MetricsServer};

/// Path of the stats endpoint.
pub const STATS_ENDPOINT: &str = "/stats";

/// Key of the component snapshot map in the response body.
pub const STATS_MAP_NAME: &str = "vmware.event.router.stats";

/// Host telemetry refreshed by the server's publish timer.
#[derive(Debug, Default)]
struct SystemStats {
    seconds_running: AtomicU64,
    last_load_bits: AtomicU64,
}

impl SystemStats {
    fn tick(&self) {
        self.seconds_running.fetch_add(1, Ordering::Relaxed);
        self.last_load_bits
            .store(read_load_avg().load1.to_bits(), Ordering::Relaxed);
    }

    fn last_load(&self) -> f64 {
        f64::from_bits(self.last_load_bits.load(Ordering::Relaxed))
    }
}

#[derive(Clone)]
struct StatsState {
    registry: Arc<StatsRegistry>,
    system: Arc<SystemStats>,
    program_name: Arc<str>,
}

/// Metrics server exposing snapshots as JSON.
pub struct EmbeddedServer {
    /// Configured listen address.
    bind_address: SocketAddr,
    /// Basic auth gate, if configured.
    credentials: Option<BasicCredentials>,
    /// Snapshot store shared with the stats handler.
    registry: Arc<StatsRegistry>,
    system: Arc<SystemStats>,
    program_name: Arc<str>,
}

impl EmbeddedServer {
    /// Create the server, validating the bind address.
    pub fn new(
        config: &EmbeddedMetricsConfig,
        registry: Arc<StatsRegistry>,
    ) -> Result<Self, RouterError> {
        let bind_address = config
            .bind_address
            .parse::<SocketAddr>()
            .with_context(|| format!("could not validate bind address {:?}", config.bind_address))
            .map_err(|e| RouterError::Construction("metrics server", e))?;

        let credentials = BasicCredentials::from_auth(config.auth.as_ref());
        if credentials.is_none() {
            warn!("disabling basic auth: no authentication data provided");
        }

        let program_name = std::env::args()
            .next()
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

        Ok(Self {
            bind_address,
            credentials,
            registry,
            system: Arc::new(SystemStats::default()),
            program_name: program_name.into(),
        })
    }

    pub const fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Snapshot store backing the endpoint.
    pub const fn registry(&self) -> &Arc<StatsRegistry> {
        &self.registry
    }

    /// Routes with auth gate and request timeout applied.
    pub fn router(&self) -> Router {
        let state = StatsState {
            registry: Arc::clone(&self.registry),
            system: Arc::clone(&self.system),
            program_name: Arc::clone(&self.program_name),
        };

        let mut router = Router::new()
            .route(STATS_ENDPOINT, get(stats_handler))
            .with_state(state);

        if let Some(credentials) = &self.credentials {
            router = router.route_layer(middleware::from_fn_with_state(
                Arc::new(credentials.clone()),
                require_basic_auth,
            ));
        }

        with_timeout(router, HTTP_TIMEOUT)
    }

    /// Serve on an already bound listener until `cancel` fires.
    #[instrument(skip_all)]
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), RouterError> {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %format!("http://{addr}{STATS_ENDPOINT}"), "starting metrics server");
        }

        let publish = cancel.child_token();
        tokio::spawn(publish_system_stats(Arc::clone(&self.system), publish.clone()));
        let _stop_publish = publish.drop_guard();

        serve_until_cancelled(listener, self.router(), cancel)
            .await
            .context("could not run metrics server")
            .map_err(RouterError::Metrics)
    }
}

/// Refresh uptime and load once per second until cancelled.
async fn publish_system_stats(system: Arc<SystemStats>, cancel: CancellationToken) {
    let mut ticker = interval(std::time::Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => system.tick(),
        }
    }
}

async fn stats_handler(State(state): State<StatsState>) -> Response {
    match render_stats(&state) {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            error!(error = %e, "could not render stats");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn render_stats(state: &StatsState) -> anyhow::Result<Value> {
    let mut body = Map::new();
    body.insert(
        STATS_MAP_NAME.to_string(),
        serde_json::to_value(state.registry.snapshot())?,
    );
    body.insert(
        "system.allLoad".to_string(),
        serde_json::to_value(read_load_avg())?,
    );
    body.insert(
        "system.lastLoad".to_string(),
        Value::from(state.system.last_load()),
    );
    body.insert(
        "system.numberOfSeconds".to_string(),
        Value::from(state.system.seconds_running.load(Ordering::Relaxed)),
    );
    body.insert(
        "system.programName".to_string(),
        Value::from(state.program_name.as_ref()),
    );
    Ok(Value::Object(body))
}

impl MetricsReceiver for EmbeddedServer {
    fn process(&self, name: &str, stats: &EventStats) {
        self.registry.process(name, stats);
    }
}

#[async_trait]
impl MetricsServer for EmbeddedServer {
    async fn run(&self, cancel: CancellationToken) -> Result<(), RouterError> {
        let listener = TcpListener::bind(self.bind_address)
            .await
            .with_context(|| format!("could not bind metrics server to {}", self.bind_address))
            .map_err(RouterError::Metrics)?;

        self.serve(listener, cancel).await
    }
}
