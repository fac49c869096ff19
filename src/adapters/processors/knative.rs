//! Knative Processor - CloudEvents HTTP Binding
//!
//! Posts every event to a single sink URL. Binary mode carries the
//! attributes in `ce-*` headers with `data` as body; structured mode
//! sends the whole event as `application/cloudevents+json`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Url};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{http_url, record};
use crate::adapters::http::client::ensure_success;
use crate::adapters::http::{HttpClient, HttpClientConfig};
use crate::adapters::metrics::StatsPublisher;
use crate::config::{CloudEventEncoding, KnativeConfig};
use crate::domain::event::CLOUDEVENTS_JSON;
use crate::domain::{Event, EventStats};
use crate::error::RouterError;
use crate::ports::{MetricsReceiver, Processor};

/// Processor delivering CloudEvents to a Knative sink.
pub struct KnativeProcessor {
    sink: Url,
    encoding: CloudEventEncoding,
    client: HttpClient,
    publisher: Arc<StatsPublisher>,
    closed: CancellationToken,
}

impl KnativeProcessor {
    pub fn new(
        config: &KnativeConfig,
        name: &str,
        root_cas: &[PathBuf],
        receiver: Arc<dyn MetricsReceiver>,
    ) -> Result<Self, RouterError> {
        let build = || -> anyhow::Result<(Url, HttpClient)> {
            let sink = http_url(&config.sink).context("invalid knative sink")?;
            let client = HttpClient::new(
                HttpClientConfig::with_root_cas(root_cas).insecure(config.insecure_ssl),
            )?;
            Ok((sink, client))
        };
        let (sink, client) = build().map_err(|e| RouterError::Construction("knative processor", e))?;

        let publisher = Arc::new(StatsPublisher::new(
            name,
            EventStats::processor(sink.as_str()),
            receiver,
        ));
        let closed = CancellationToken::new();
        publisher.start(closed.clone());

        Ok(Self {
            sink,
            encoding: config.encoding,
            client,
            publisher,
            closed,
        })
    }

    /// Stats of this processor.
    pub fn stats(&self) -> EventStats {
        self.publisher.snapshot()
    }

    fn request(&self, event: &Event) -> anyhow::Result<RequestBuilder> {
        let request = self.client.inner().post(self.sink.clone());
        Ok(match self.encoding {
            CloudEventEncoding::Structured => request
                .header(CONTENT_TYPE, CLOUDEVENTS_JSON)
                .body(serde_json::to_vec(event).context("could not encode event")?),
            CloudEventEncoding::Binary => binary_request(request, event)?,
        })
    }

    async fn deliver(&self, event: &Event) -> anyhow::Result<()> {
        anyhow::ensure!(!self.closed.is_cancelled(), "knative processor is shut down");
        let response = self.client.send(self.request(event)?).await?;
        ensure_success(response).await?;
        Ok(())
    }
}

/// Attach `event` to `request` in binary content mode.
pub fn binary_request(request: RequestBuilder, event: &Event) -> anyhow::Result<RequestBuilder> {
    let mut request = request
        .header("ce-specversion", &event.specversion)
        .header("ce-id", &event.id)
        .header("ce-source", &event.source)
        .header("ce-type", &event.event_type)
        .header(CONTENT_TYPE, &event.datacontenttype);
    if let Some(subject) = &event.subject {
        request = request.header("ce-subject", subject);
    }
    if let Some(time) = &event.time {
        request = request.header("ce-time", time.to_rfc3339());
    }

    let body = match &event.data {
        serde_json::Value::String(text) if !event.datacontenttype.contains("json") => {
            text.clone().into_bytes()
        }
        serde_json::Value::Null => Vec::new(),
        data => serde_json::to_vec(data).context("could not encode event data")?,
    };
    Ok(request.body(body))
}

#[async_trait]
impl Processor for KnativeProcessor {
    async fn process(&self, event: &Event) -> Result<(), RouterError> {
        let outcome = self.deliver(event).await;
        record(&self.publisher, event, outcome)
    }

    async fn shutdown(&self, _cancel: CancellationToken) -> Result<(), RouterError> {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            self.publisher.push();
            info!(processor = %self.publisher.name(), sink = %self.sink, "Knative processor stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::metrics::StatsRegistry;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::json;
    use std::sync::Mutex;

    type Captured = Arc<Mutex<Vec<(HeaderMap, Vec<u8>)>>>;

    async fn fake_sink(status: StatusCode) -> (String, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new().route(
            "/",
            post({
                let captured = Arc::clone(&captured);
                move |headers: HeaderMap, body: axum::body::Bytes| async move {
                    captured.lock().unwrap().push((headers, body.to_vec()));
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{addr}/"), captured)
    }

    fn processor(sink: String, encoding: CloudEventEncoding) -> KnativeProcessor {
        KnativeProcessor::new(
            &KnativeConfig {
                sink,
                encoding,
                insecure_ssl: false,
            },
            "knative",
            &[],
            Arc::new(StatsRegistry::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_sink_rejected() {
        let result = KnativeProcessor::new(
            &KnativeConfig {
                sink: "broker".to_string(),
                encoding: CloudEventEncoding::Binary,
                insecure_ssl: false,
            },
            "knative",
            &[],
            Arc::new(StatsRegistry::new()),
        );
        assert!(matches!(result, Err(RouterError::Construction("knative processor", _))));
    }

    #[tokio::test]
    async fn test_binary_mode_headers() {
        let (sink, captured) = fake_sink(StatusCode::ACCEPTED).await;
        let processor = processor(sink, CloudEventEncoding::Binary);
        let event = Event::new("https://vc01/sdk", "VmPoweredOnEvent", json!({"Key": 1})).with_id("1");

        processor.process(&event).await.unwrap();

        let (headers, body) = captured.lock().unwrap().remove(0);
        assert_eq!(headers["ce-id"], "1");
        assert_eq!(headers["ce-subject"], "VmPoweredOnEvent");
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap()["Key"], 1);

        let stats = processor.stats();
        assert_eq!(stats.invocations().unwrap()["VmPoweredOnEvent"].success_count, 1);
    }

    #[tokio::test]
    async fn test_structured_mode_failure_counted() {
        let (sink, captured) = fake_sink(StatusCode::BAD_REQUEST).await;
        let processor = processor(sink, CloudEventEncoding::Structured);
        let event = Event::new("https://vc01/sdk", "VmCreatedEvent", json!({}));

        let err = processor.process(&event).await.unwrap_err();
        assert!(matches!(err, RouterError::Delivery(_)));

        let (headers, body) = captured.lock().unwrap().remove(0);
        assert_eq!(headers["content-type"], CLOUDEVENTS_JSON);
        let sent: Event = serde_json::from_slice(&body).unwrap();
        assert_eq!(sent.id, event.id);

        let details = processor.stats().invocations().unwrap()["VmCreatedEvent"];
        assert_eq!(details.failure_count, 1);

        processor.shutdown(CancellationToken::new()).await.unwrap();
        processor.shutdown(CancellationToken::new()).await.unwrap();
        assert!(processor.process(&event).await.is_err());
    }
}
