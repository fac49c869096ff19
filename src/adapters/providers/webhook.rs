//! Webhook Provider - Inbound CloudEvents over HTTP
//!
//! Accepts CloudEvents posted to a configurable path, in structured
//! mode (JSON body) or binary mode (`ce-*` headers + data body). Each
//! request is answered only after the processor returned, and requests
//! are handed over one at a time, so the HTTP caller observes the
//! delivery outcome:
//!
//! - `200` delivered
//! - `400` malformed event
//! - `500` processor failed
//! - `503` router shutting down
//!
//! Unlike the metrics endpoints there is no per-request timeout: the
//! reply waits as long as the processor (including its retries) does.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, anyhow, ensure};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Router, middleware};
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::deliver;
use crate::adapters::http::{BasicCredentials, require_basic_auth, serve_until_cancelled};
use crate::adapters::metrics::StatsPublisher;
use crate::config::WebhookConfig;
use crate::domain::event::{JSON_CONTENT_TYPE, SPEC_VERSION};
use crate::domain::{Event, EventStats};
use crate::error::RouterError;
use crate::ports::{MetricsReceiver, Processor, Provider};

/// Liveness endpoint, never behind auth.
pub const HEALTH_PATH: &str = "/health";

/// An accepted request waiting for its delivery outcome.
struct Inbound {
    event: Event,
    reply: oneshot::Sender<bool>,
}

#[derive(Clone)]
struct WebhookState {
    events: mpsc::Sender<Inbound>,
}

/// Provider receiving events from HTTP clients.
pub struct WebhookProvider {
    path: String,
    credentials: Option<BasicCredentials>,
    /// Bound at construction; taken by the first `stream` call.
    listener: Mutex<Option<std::net::TcpListener>>,
    local_addr: SocketAddr,
    publisher: Arc<StatsPublisher>,
    closed: CancellationToken,
}

impl WebhookProvider {
    /// Validate the settings and bind the listen socket.
    pub fn new(
        config: &WebhookConfig,
        name: &str,
        receiver: Arc<dyn MetricsReceiver>,
    ) -> Result<Self, RouterError> {
        let (listener, local_addr) =
            bind(config).map_err(|e| RouterError::Construction("webhook provider", e))?;

        let credentials = BasicCredentials::from_auth(config.auth.as_ref());
        if credentials.is_none() {
            warn!(provider = %name, "Webhook accepts unauthenticated requests: no authentication data provided");
        }

        Ok(Self {
            path: config.path.clone(),
            credentials,
            listener: Mutex::new(Some(listener)),
            local_addr,
            publisher: Arc::new(StatsPublisher::new(
                name,
                EventStats::provider(format!("http://{local_addr}{}", config.path)),
                receiver,
            )),
            closed: CancellationToken::new(),
        })
    }

    /// Address the webhook listens on.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stats of this provider.
    pub fn stats(&self) -> EventStats {
        self.publisher.snapshot()
    }

    fn router(&self, events: mpsc::Sender<Inbound>) -> Router {
        let mut router = Router::new()
            .route(&self.path, post(receive_event))
            .with_state(WebhookState { events });

        if let Some(credentials) = &self.credentials {
            router = router.route_layer(middleware::from_fn_with_state(
                Arc::new(credentials.clone()),
                require_basic_auth,
            ));
        }

        router.route(HEALTH_PATH, get(|| async { "ok" }))
    }
}

fn bind(config: &WebhookConfig) -> anyhow::Result<(std::net::TcpListener, SocketAddr)> {
    ensure!(config.path.starts_with('/'), "webhook path {:?} must start with '/'", config.path);
    ensure!(config.path != HEALTH_PATH, "webhook path must not be {HEALTH_PATH}");

    let addr = config
        .bind_address
        .parse::<SocketAddr>()
        .with_context(|| format!("could not validate bind address {:?}", config.bind_address))?;
    let listener = std::net::TcpListener::bind(addr)
        .with_context(|| format!("could not bind webhook listener to {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("could not configure webhook listener")?;
    let local_addr = listener.local_addr().context("could not read webhook address")?;
    Ok((listener, local_addr))
}

#[async_trait]
impl Provider for WebhookProvider {
    #[instrument(skip_all, fields(provider = %self.publisher.name()))]
    async fn stream(
        &self,
        cancel: CancellationToken,
        processor: Arc<dyn Processor>,
    ) -> Result<(), RouterError> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| RouterError::Stream(anyhow!("webhook provider is already streaming")))?;
        let listener = TcpListener::from_std(listener)
            .context("could not register webhook listener")
            .map_err(RouterError::Stream)?;

        self.publisher.start(cancel.clone());

        let (events, mut inbox) = mpsc::channel::<Inbound>(1);
        let serving = cancel.child_token();
        let mut server = tokio::spawn(serve_until_cancelled(
            listener,
            self.router(events),
            serving.clone(),
        ));
        info!(address = %format!("http://{}{}", self.local_addr, self.path), "Accepting webhook events");

        let outcome = loop {
            let inbound = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                () = self.closed.cancelled() => break Ok(()),
                result = &mut server => {
                    break Err(match result {
                        Ok(Ok(())) => anyhow!("webhook server stopped unexpectedly"),
                        Ok(Err(e)) => e,
                        Err(e) => anyhow::Error::new(e).context("webhook server task failed"),
                    });
                }
                inbound = inbox.recv() => inbound,
            };

            let Some(Inbound { event, reply }) = inbound else {
                break Ok(());
            };

            let delivered = deliver(processor.as_ref(), &event, &self.publisher).await;
            if reply.send(delivered).is_err() {
                debug!(id = %event.id, "Webhook caller went away before the reply");
            }
        };

        // queued and later requests see the inbox gone and answer 503
        drop(inbox);
        serving.cancel();
        self.publisher.push();

        match outcome {
            Ok(()) => server
                .await
                .context("webhook server task failed")
                .and_then(|result| result)
                .map_err(RouterError::Stream),
            Err(e) => Err(RouterError::Stream(e)),
        }
    }

    async fn shutdown(&self, _cancel: CancellationToken) -> Result<(), RouterError> {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            // release the socket if streaming never started
            self.listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            info!(provider = %self.publisher.name(), "Webhook provider stopped");
        }
        Ok(())
    }
}

async fn receive_event(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event = match decode_event(&headers, &body) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed webhook request");
            return (StatusCode::BAD_REQUEST, format!("{e:#}")).into_response();
        }
    };

    let (reply, outcome) = oneshot::channel();
    if state.events.send(Inbound { event, reply }).await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "router is shutting down").into_response();
    }

    match outcome.await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => (StatusCode::INTERNAL_SERVER_ERROR, "could not deliver event").into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "router is shutting down").into_response(),
    }
}

/// Decode a CloudEvent from a structured or binary mode request.
pub fn decode_event(headers: &HeaderMap, body: &[u8]) -> anyhow::Result<Event> {
    if headers.contains_key("ce-specversion") {
        decode_binary(headers, body)
    } else {
        decode_structured(body)
    }
}

fn decode_structured(body: &[u8]) -> anyhow::Result<Event> {
    let event: Event = serde_json::from_slice(body).context("invalid structured CloudEvent")?;
    ensure!(
        event.specversion == SPEC_VERSION,
        "unsupported specversion {:?}",
        event.specversion
    );
    ensure!(!event.id.is_empty(), "event id must not be empty");
    ensure!(!event.source.is_empty(), "event source must not be empty");
    Ok(event)
}

fn decode_binary(headers: &HeaderMap, body: &[u8]) -> anyhow::Result<Event> {
    let attribute = |name: &str| -> anyhow::Result<Option<String>> {
        headers
            .get(name)
            .map(|value| {
                value
                    .to_str()
                    .map(str::to_string)
                    .with_context(|| format!("header {name} is not valid text"))
            })
            .transpose()
    };
    let required = |name: &str| -> anyhow::Result<String> {
        attribute(name)?
            .filter(|value| !value.is_empty())
            .with_context(|| format!("missing header {name}"))
    };

    let specversion = required("ce-specversion")?;
    ensure!(specversion == SPEC_VERSION, "unsupported specversion {specversion:?}");

    let time = attribute("ce-time")?
        .map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|time| time.with_timezone(&Utc))
                .with_context(|| format!("invalid ce-time {value:?}"))
        })
        .transpose()?;

    let datacontenttype = attribute(header::CONTENT_TYPE.as_str())?
        .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string());

    let data = if body.is_empty() {
        serde_json::Value::Null
    } else if datacontenttype.contains("json") {
        serde_json::from_slice(body).context("event data is not valid JSON")?
    } else {
        serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
    };

    Ok(Event {
        id: required("ce-id")?,
        source: required("ce-source")?,
        event_type: required("ce-type")?,
        specversion,
        subject: attribute("ce-subject")?,
        time,
        datacontenttype,
        data,
    })
}
