//! AWS EventBridge Processor - PutEvents over SigV4
//!
//! Sends one `PutEvents` entry per event to the configured bus. The
//! entry's `Source` is the event source, `DetailType` its category and
//! `Detail` the whole event as JSON. A `200` reply can still carry
//! per-entry failures, so `FailedEntryCount` is checked as well.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::sigv4::{AMZ_DATE_FORMAT, Signer};
use super::{http_url, record};
use crate::adapters::http::client::ensure_success;
use crate::adapters::http::{HttpClient, HttpClientConfig};
use crate::adapters::metrics::StatsPublisher;
use crate::config::EventBridgeConfig;
use crate::domain::{Event, EventStats};
use crate::error::RouterError;
use crate::ports::{MetricsReceiver, Processor};

/// Signing name of the EventBridge API.
pub const SERVICE: &str = "events";

/// JSON-RPC target of the `PutEvents` action.
pub const PUT_EVENTS_TARGET: &str = "AWSEvents.PutEvents";

/// Media type of AWS JSON 1.1 requests.
pub const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsResponse {
    #[serde(default)]
    failed_entry_count: u64,
    #[serde(default)]
    entries: Vec<PutEventsResultEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsResultEntry {
    error_code: Option<String>,
    error_message: Option<String>,
}

/// Processor publishing events to an EventBridge bus.
pub struct EventBridgeProcessor {
    endpoint: Url,
    host: String,
    event_bus: String,
    signer: Signer,
    client: HttpClient,
    publisher: Arc<StatsPublisher>,
    closed: CancellationToken,
}

impl EventBridgeProcessor {
    pub fn new(
        config: &EventBridgeConfig,
        name: &str,
        root_cas: &[PathBuf],
        receiver: Arc<dyn MetricsReceiver>,
    ) -> Result<Self, RouterError> {
        let build = || -> Result<(Url, String, HttpClient)> {
            ensure!(!config.region.is_empty(), "aws region must not be empty");
            ensure!(!config.access_key_id.is_empty(), "aws access key id must not be empty");
            ensure!(!config.secret_access_key.is_empty(), "aws secret access key must not be empty");

            let raw = config
                .endpoint
                .clone()
                .unwrap_or_else(|| format!("https://events.{}.amazonaws.com", config.region));
            let endpoint = http_url(&raw).context("invalid eventbridge endpoint")?;
            let host = match (endpoint.host_str(), endpoint.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => bail!("eventbridge endpoint has no host"),
            };

            let client = HttpClient::new(HttpClientConfig::with_root_cas(root_cas))?;
            Ok((endpoint, host, client))
        };
        let (endpoint, host, client) =
            build().map_err(|e| RouterError::Construction("aws_event_bridge processor", e))?;

        if let Some(rule) = &config.rule_arn {
            info!(processor = %name, rule = %rule, bus = %config.event_bus, "Publishing events for rule");
        }

        let publisher = Arc::new(StatsPublisher::new(
            name,
            EventStats::processor(endpoint.as_str()),
            receiver,
        ));
        let closed = CancellationToken::new();
        publisher.start(closed.clone());

        Ok(Self {
            endpoint,
            host,
            event_bus: config.event_bus.clone(),
            signer: Signer::new(
                &config.access_key_id,
                &config.secret_access_key,
                &config.region,
                SERVICE,
            ),
            client,
            publisher,
            closed,
        })
    }

    /// Stats of this processor.
    pub fn stats(&self) -> EventStats {
        self.publisher.snapshot()
    }

    fn put_events_body(&self, event: &Event) -> Result<Vec<u8>> {
        let mut entry = json!({
            "Source": event.source,
            "DetailType": event.category(),
            "Detail": serde_json::to_string(event).context("could not encode event")?,
            "EventBusName": self.event_bus,
        });
        if let Some(time) = event.time {
            entry["Time"] = time.timestamp().into();
        }
        serde_json::to_vec(&json!({ "Entries": [entry] })).context("could not encode request")
    }

    async fn put_event(&self, event: &Event) -> Result<()> {
        ensure!(!self.closed.is_cancelled(), "eventbridge processor is shut down");

        let body = self.put_events_body(event)?;
        let now = Utc::now();
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();

        let mut signed = BTreeMap::new();
        signed.insert("content-type".to_string(), AMZ_JSON.to_string());
        signed.insert("host".to_string(), self.host.clone());
        signed.insert("x-amz-date".to_string(), amz_date.clone());
        signed.insert("x-amz-target".to_string(), PUT_EVENTS_TARGET.to_string());
        let authorization = self.signer.authorization("POST", "/", &signed, &body, now);

        let request = self
            .client
            .inner()
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, AMZ_JSON)
            .header("x-amz-date", amz_date)
            .header("x-amz-target", PUT_EVENTS_TARGET)
            .header(AUTHORIZATION, authorization)
            .body(body);

        let response = ensure_success(self.client.send(request).await?).await?;
        let reply: PutEventsResponse = response.json().await.context("invalid PutEvents response")?;
        check_reply(&reply)
    }
}

fn check_reply(reply: &PutEventsResponse) -> Result<()> {
    if reply.failed_entry_count == 0 {
        return Ok(());
    }

    let reason = reply
        .entries
        .iter()
        .find_map(|entry| {
            entry.error_code.as_ref().map(|code| {
                format!("{code}: {}", entry.error_message.as_deref().unwrap_or_default())
            })
        })
        .unwrap_or_else(|| "unknown error".to_string());
    bail!("eventbridge rejected {} entries ({reason})", reply.failed_entry_count)
}

#[async_trait]
impl Processor for EventBridgeProcessor {
    async fn process(&self, event: &Event) -> Result<(), RouterError> {
        let outcome = self.put_event(event).await;
        record(&self.publisher, event, outcome)
    }

    async fn shutdown(&self, _cancel: CancellationToken) -> Result<(), RouterError> {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            self.publisher.push();
            info!(processor = %self.publisher.name(), bus = %self.event_bus, "EventBridge processor stopped");
        }
        Ok(())
    }
}
