//! OpenFaaS Processor - Topic-routed Function Invocation
//!
//! Functions subscribe to event categories through a `topic`
//! annotation (comma separated). The subscription map is read from the
//! gateway's `/system/functions` endpoint and refreshed lazily once it
//! is older than the configured refresh period. Each event invokes every
//! subscribed function, synchronously (`/function/<name>`) or through
//! the gateway queue (`/async-function/<name>`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{http_url, record};
use crate::adapters::http::client::ensure_success;
use crate::adapters::http::{BasicCredentials, HttpClient, HttpClientConfig};
use crate::adapters::metrics::StatsPublisher;
use crate::config::OpenFaasConfig;
use crate::domain::event::JSON_CONTENT_TYPE;
use crate::domain::{Event, EventStats};
use crate::error::RouterError;
use crate::ports::{MetricsReceiver, Processor};

/// Annotation carrying a function's subscribed categories.
pub const TOPIC_ANNOTATION: &str = "topic";

/// Header telling the function which category triggered it.
pub const TOPIC_HEADER: &str = "x-topic";

#[derive(Debug, Deserialize)]
struct FunctionStatus {
    name: String,
    #[serde(default)]
    annotations: Option<HashMap<String, String>>,
}

/// Map categories to subscribed function names, as listed by `/system/functions`.
pub fn parse_topic_map(body: &[u8]) -> Result<HashMap<String, Vec<String>>> {
    let functions: Vec<FunctionStatus> =
        serde_json::from_slice(body).context("invalid function list")?;

    let mut topics: HashMap<String, Vec<String>> = HashMap::new();
    for function in functions {
        let Some(annotation) = function
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(TOPIC_ANNOTATION))
        else {
            continue;
        };

        for topic in annotation.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let subscribers = topics.entry(topic.to_string()).or_default();
            if !subscribers.contains(&function.name) {
                subscribers.push(function.name.clone());
            }
        }
    }

    for subscribers in topics.values_mut() {
        subscribers.sort();
    }
    Ok(topics)
}

#[derive(Debug, Default)]
struct TopicCache {
    topics: HashMap<String, Vec<String>>,
    refreshed: Option<Instant>,
}

/// Processor invoking OpenFaaS functions by topic.
pub struct OpenFaasProcessor {
    gateway: Url,
    async_invocation: bool,
    credentials: Option<BasicCredentials>,
    refresh_every: Duration,
    client: HttpClient,
    cache: Mutex<TopicCache>,
    publisher: Arc<StatsPublisher>,
    closed: CancellationToken,
}

impl OpenFaasProcessor {
    pub fn new(
        config: &OpenFaasConfig,
        name: &str,
        root_cas: &[PathBuf],
        receiver: Arc<dyn MetricsReceiver>,
    ) -> Result<Self, RouterError> {
        let build = || -> Result<(Url, HttpClient)> {
            let mut gateway = http_url(&config.address).context("invalid openfaas gateway")?;
            // relative joins must append to the gateway path
            if !gateway.path().ends_with('/') {
                let path = format!("{}/", gateway.path());
                gateway.set_path(&path);
            }
            let client = HttpClient::new(HttpClientConfig::with_root_cas(root_cas))?;
            Ok((gateway, client))
        };
        let (gateway, client) =
            build().map_err(|e| RouterError::Construction("openfaas processor", e))?;

        let credentials = BasicCredentials::from_auth(config.auth.as_ref());
        if credentials.is_none() {
            warn!(processor = %name, "No gateway credentials configured");
        }

        let publisher = Arc::new(StatsPublisher::new(
            name,
            EventStats::processor(gateway.as_str()),
            receiver,
        ));
        let closed = CancellationToken::new();
        publisher.start(closed.clone());

        Ok(Self {
            gateway,
            async_invocation: config.async_invocation,
            credentials,
            refresh_every: Duration::from_secs(config.topic_refresh_secs),
            client,
            cache: Mutex::new(TopicCache::default()),
            publisher,
            closed,
        })
    }

    /// Stats of this processor.
    pub fn stats(&self) -> EventStats {
        self.publisher.snapshot()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.gateway
            .join(path)
            .with_context(|| format!("invalid gateway path {path:?}"))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(credentials) => request.header(AUTHORIZATION, credentials.header_value()),
            None => request,
        }
    }

    async fn fetch_topics(&self) -> Result<HashMap<String, Vec<String>>> {
        let request = self.authorize(self.client.inner().get(self.endpoint("system/functions")?));
        let response = ensure_success(self.client.send(request).await?).await?;
        let body = response.bytes().await.context("could not read function list")?;
        parse_topic_map(&body)
    }

    /// Functions subscribed to `category`, refreshing the map when stale.
    async fn subscribers(&self, category: &str) -> Result<Vec<String>> {
        let mut cache = self.cache.lock().await;
        let stale = cache
            .refreshed
            .is_none_or(|at| at.elapsed() >= self.refresh_every);

        if stale {
            match self.fetch_topics().await {
                Ok(topics) => {
                    debug!(topics = topics.len(), "Refreshed topic subscriptions");
                    cache.topics = topics;
                    cache.refreshed = Some(Instant::now());
                }
                // keep serving the last known map
                Err(e) if cache.refreshed.is_some() => {
                    warn!(error = %format!("{e:#}"), "Could not refresh topic subscriptions");
                }
                Err(e) => return Err(e.context("could not load topic subscriptions")),
            }
        }

        Ok(cache.topics.get(category).cloned().unwrap_or_default())
    }

    async fn invoke(&self, function: &str, event: &Event, body: &[u8]) -> Result<()> {
        let prefix = if self.async_invocation { "async-function" } else { "function" };
        let request = self
            .client
            .inner()
            .post(self.endpoint(&format!("{prefix}/{function}"))?)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(TOPIC_HEADER, event.category())
            .body(body.to_vec());

        ensure_success(self.client.send(self.authorize(request)).await?)
            .await
            .with_context(|| format!("function {function} failed"))?;
        Ok(())
    }
}

#[async_trait]
impl Processor for OpenFaasProcessor {
    async fn process(&self, event: &Event) -> Result<(), RouterError> {
        if self.closed.is_cancelled() {
            return record(
                &self.publisher,
                event,
                Err(anyhow::anyhow!("openfaas processor is shut down")),
            );
        }

        let functions = match self.subscribers(event.category()).await {
            Ok(functions) => functions,
            Err(e) => return record(&self.publisher, event, Err(e)),
        };
        if functions.is_empty() {
            debug!(category = %event.category(), "No function subscribed");
            return Ok(());
        }

        let body = serde_json::to_vec(event)
            .context("could not encode event")
            .map_err(RouterError::Delivery)?;

        let mut failed = Vec::new();
        for function in &functions {
            let outcome = self.invoke(function, event, &body).await;
            if let Err(e) = record(&self.publisher, event, outcome) {
                failed.push(e);
            }
        }

        match failed.len() {
            0 => Ok(()),
            1 => Err(failed.remove(0)),
            n => Err(RouterError::Delivery(anyhow::anyhow!(
                "{n} of {} functions failed for {}",
                functions.len(),
                event.category()
            ))),
        }
    }

    async fn shutdown(&self, _cancel: CancellationToken) -> Result<(), RouterError> {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            self.publisher.push();
            info!(processor = %self.publisher.name(), gateway = %self.gateway, "OpenFaaS processor stopped");
        }
        Ok(())
    }
}
