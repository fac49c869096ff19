//! Integration Tests - End-to-end Router Component Testing
//!
//! Tests the interaction between the lifecycle controller, ports, real
//! adapters, mock components and the built binary. Uses mockall for
//! trait mocking and tokio::test for async tests.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use mockall::{Sequence, mock};
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use event_router::adapters::http::HTTP_TIMEOUT;
use event_router::adapters::metrics::{EmbeddedServer, StatsRegistry};
use event_router::adapters::processors::KnativeProcessor;
use event_router::adapters::providers::simulator::CATEGORIES;
use event_router::adapters::providers::{SimulatorProvider, WebhookProvider};
use event_router::config::loader::parse_config;
use event_router::config::{
    CloudEventEncoding, EmbeddedMetricsConfig, KnativeConfig, SimulatorConfig, WebhookConfig,
};
use event_router::domain::{Event, EventStats};
use event_router::error::RouterError;
use event_router::ports::{MetricsReceiver, MetricsServer, Processor, Provider};
use event_router::usecases::{Components, lifecycle, run_components, shutdown_all};

// ---- Mock Definitions ----

mock! {
    pub Sink {}

    #[async_trait::async_trait]
    impl Processor for Sink {
        async fn process(&self, event: &Event) -> Result<(), RouterError>;
        async fn shutdown(&self, cancel: CancellationToken) -> Result<(), RouterError>;
    }
}

mock! {
    pub Source {}

    #[async_trait::async_trait]
    impl Provider for Source {
        async fn stream(
            &self,
            cancel: CancellationToken,
            processor: Arc<dyn Processor>,
        ) -> Result<(), RouterError>;
        async fn shutdown(&self, cancel: CancellationToken) -> Result<(), RouterError>;
    }
}

// ---- Helpers ----

fn embedded(registry: &Arc<StatsRegistry>) -> Arc<EmbeddedServer> {
    let config = EmbeddedMetricsConfig {
        bind_address: "127.0.0.1:0".to_string(),
        auth: None,
    };
    Arc::new(EmbeddedServer::new(&config, Arc::clone(registry)).unwrap())
}

fn simulator(max_events: u64, receiver: Arc<dyn MetricsReceiver>) -> SimulatorProvider {
    let config = SimulatorConfig {
        address: "simulator://test".to_string(),
        interval_ms: 10,
        max_events,
    };
    SimulatorProvider::new(&config, "sim", receiver).unwrap()
}

fn webhook(receiver: Arc<dyn MetricsReceiver>) -> WebhookProvider {
    let config = WebhookConfig {
        bind_address: "127.0.0.1:0".to_string(),
        path: "/webhook".to_string(),
        auth: None,
    };
    WebhookProvider::new(&config, "webhook", receiver).unwrap()
}

/// Components with the provider and processor also kept by the caller.
fn components<P, S>(provider: &Arc<P>, sink: &Arc<S>, metrics: Arc<dyn MetricsServer>) -> Components
where
    P: Provider + 'static,
    S: Processor + 'static,
{
    Components {
        provider: Arc::clone(provider) as Arc<dyn Provider>,
        processor: Arc::clone(sink) as Arc<dyn Processor>,
        metrics,
    }
}

type Received = Arc<std::sync::Mutex<Vec<String>>>;

/// CloudEvents sink recording the `header` value of every request.
async fn recording_sink(header: &'static str) -> (std::net::SocketAddr, Received) {
    let received = Received::default();
    let app = Router::new().route(
        "/",
        post({
            let received = Arc::clone(&received);
            move |headers: axum::http::HeaderMap| async move {
                let value = headers
                    .get(header)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                received.lock().unwrap().push(value);
                StatusCode::ACCEPTED
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (addr, received)
}

/// Processor taking `delay` for every delivery.
struct SlowSink {
    delay: Duration,
}

#[async_trait::async_trait]
impl Processor for SlowSink {
    async fn process(&self, _event: &Event) -> Result<(), RouterError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn shutdown(&self, _cancel: CancellationToken) -> Result<(), RouterError> {
        Ok(())
    }
}

// ---- Lifecycle Tests ----

#[tokio::test]
async fn test_events_delivered_in_order() {
    let registry = Arc::new(StatsRegistry::new());
    let metrics = embedded(&registry);

    let mut sink = MockSink::new();
    let mut seq = Sequence::new();
    for category in CATEGORIES.iter().take(3).copied() {
        sink.expect_process()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |event| event.category() == category)
            .returning(|_| Ok(()));
    }
    sink.expect_shutdown().times(1).returning(|_| Ok(()));
    let sink = Arc::new(sink);

    let provider = Arc::new(simulator(3, Arc::clone(&metrics) as Arc<dyn MetricsReceiver>));
    let root = CancellationToken::new();

    let result = run_components(components(&provider, &sink, metrics), &root).await;
    assert_ok!(result);

    let stats = registry.get("sim").expect("provider stats pushed");
    assert_eq!(stats.events_total(), Some(3));
    assert_eq!(stats.events_err(), Some(0));
    assert!(stats.invocations().is_none());
}

#[tokio::test]
async fn test_processor_counts_every_delivery() {
    let (sink, received) = recording_sink("ce-subject").await;
    let registry = Arc::new(StatsRegistry::new());
    let metrics = embedded(&registry);
    let receiver = Arc::clone(&metrics) as Arc<dyn MetricsReceiver>;

    let config = KnativeConfig {
        sink: format!("http://{sink}/"),
        encoding: CloudEventEncoding::Binary,
        insecure_ssl: false,
    };
    let processor = Arc::new(KnativeProcessor::new(&config, "broker", &[], Arc::clone(&receiver)).unwrap());
    let provider = Arc::new(simulator(3, receiver));

    let result = run_components(
        components(&provider, &processor, metrics),
        &CancellationToken::new(),
    )
    .await;
    assert_ok!(result);

    let expected: Vec<String> = CATEGORIES.iter().take(3).map(ToString::to_string).collect();
    assert_eq!(*received.lock().unwrap(), expected);

    let stats = registry.get("broker").expect("processor stats pushed");
    let invocations = stats.invocations().expect("processor stats carry invocations");
    let successes: u64 = invocations.values().map(|details| details.success_count).sum();
    let failures: u64 = invocations.values().map(|details| details.failure_count).sum();
    assert_eq!(successes, 3);
    assert_eq!(failures, 0);
    assert!(stats.events_total().is_none());

    let provider_stats = registry.get("sim").expect("provider stats pushed");
    assert_eq!(provider_stats.events_total(), Some(3));
}

#[tokio::test]
async fn test_delivery_failures_counted_not_fatal() {
    let registry = Arc::new(StatsRegistry::new());
    let metrics = embedded(&registry);

    let mut sink = MockSink::new();
    sink.expect_process()
        .times(4)
        .returning(|event| match event.id.as_str() {
            "1" | "3" => Err(RouterError::Delivery(anyhow::anyhow!("gateway down"))),
            _ => Ok(()),
        });
    sink.expect_shutdown().times(1).returning(|_| Ok(()));
    let sink = Arc::new(sink);

    let provider = Arc::new(simulator(4, Arc::clone(&metrics) as Arc<dyn MetricsReceiver>));
    let result = run_components(
        components(&provider, &sink, metrics),
        &CancellationToken::new(),
    )
    .await;
    assert_ok!(result);

    let stats = provider.stats();
    assert_eq!(stats.events_total(), Some(4));
    assert_eq!(stats.events_err(), Some(2));
}

#[tokio::test]
async fn test_no_delivery_after_cancellation() {
    let registry = Arc::new(StatsRegistry::new());
    let metrics = embedded(&registry);
    let root = CancellationToken::new();

    let mut sink = MockSink::new();
    let canceller = root.clone();
    sink.expect_process().times(1).returning(move |_| {
        canceller.cancel();
        Ok(())
    });
    sink.expect_shutdown().times(1).returning(|_| Ok(()));
    let sink = Arc::new(sink);

    // unbounded: only cancellation ends the stream
    let provider = Arc::new(simulator(0, Arc::clone(&metrics) as Arc<dyn MetricsReceiver>));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run_components(components(&provider, &sink, metrics), &root),
    )
    .await
    .expect("router stops after cancellation");
    assert_ok!(result);
    assert_eq!(provider.stats().events_total(), Some(1));
}

#[tokio::test]
async fn test_stream_failure_still_shuts_down_both() {
    let registry = Arc::new(StatsRegistry::new());
    let metrics = embedded(&registry);

    let mut source = MockSource::new();
    source
        .expect_stream()
        .times(1)
        .returning(|_, _| Err(RouterError::Stream(anyhow::anyhow!("session expired"))));
    source.expect_shutdown().times(1).returning(|_| Ok(()));
    let source = Arc::new(source);

    let mut sink = MockSink::new();
    sink.expect_process().never();
    sink.expect_shutdown().times(1).returning(|_| Ok(()));
    let sink = Arc::new(sink);

    let result = run_components(
        components(&source, &sink, metrics),
        &CancellationToken::new(),
    )
    .await;
    let err = assert_err!(result);
    assert!(matches!(err, RouterError::Stream(_)));
}

#[tokio::test]
async fn test_shutdown_order_and_error_isolation() {
    let mut seq = Sequence::new();

    let mut source = MockSource::new();
    source
        .expect_shutdown()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(RouterError::Shutdown(anyhow::anyhow!("logout failed"))));

    let mut sink = MockSink::new();
    sink.expect_shutdown()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(RouterError::Shutdown(anyhow::anyhow!("flush failed"))));

    let errors = shutdown_all(&source, &sink).await;
    assert_eq!(errors.len(), 2);
    assert!(errors[0].to_string().contains("logout failed"));
    assert!(errors[1].to_string().contains("flush failed"));
}

// ---- Metrics Tests ----

#[tokio::test]
async fn test_stats_endpoint_serves_pushed_snapshots() {
    let registry = Arc::new(StatsRegistry::new());
    let server = embedded(&registry);

    let mut provider_stats = EventStats::provider("https://vc01/sdk");
    provider_stats.record_event(true);
    server.process("vcenter", &provider_stats);

    let mut processor_stats = EventStats::processor("http://gateway:8080");
    processor_stats.record_invocation("VmPoweredOnEvent", true);
    server.process("openfaas", &processor_stats);

    // last write wins
    provider_stats.record_event(false);
    server.process("vcenter", &provider_stats);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let serving = tokio::spawn({
        let server = Arc::clone(&server);
        let cancel = cancel.clone();
        async move { server.serve(listener, cancel).await }
    });

    let body: Value = reqwest::get(format!("http://{addr}/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let stats = &body["vmware.event.router.stats"];
    assert_eq!(stats["vcenter"]["type"], "provider");
    assert_eq!(stats["vcenter"]["events_total"], 2);
    assert_eq!(stats["vcenter"]["events_err"], 1);
    assert!(stats["vcenter"].get("invocations").is_none());
    assert_eq!(stats["openfaas"]["type"], "processor");
    assert_eq!(
        stats["openfaas"]["invocations"]["VmPoweredOnEvent"]["success_count"],
        1
    );
    assert!(stats["openfaas"].get("events_total").is_none());
    assert!(body.get("system.programName").is_some());

    cancel.cancel();
    assert_ok!(serving.await.unwrap());
}

// ---- Webhook Tests ----

#[tokio::test]
async fn test_webhook_end_to_end() {
    let registry = Arc::new(StatsRegistry::new());
    let metrics = embedded(&registry);

    let mut sink = MockSink::new();
    let mut seq = Sequence::new();
    sink.expect_process()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|event| event.id == "structured-1" && event.category() == "VmCreatedEvent")
        .returning(|_| Ok(()));
    sink.expect_process()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|event| event.id == "binary-1" && event.data["Key"] == 7)
        .returning(|_| Err(RouterError::Delivery(anyhow::anyhow!("sink rejected"))));
    sink.expect_shutdown().times(1).returning(|_| Ok(()));
    let sink = Arc::new(sink);

    let provider = Arc::new(webhook(Arc::clone(&metrics) as Arc<dyn MetricsReceiver>));
    let url = format!("http://{}/webhook", provider.local_addr());
    let root = CancellationToken::new();

    let router = tokio::spawn({
        let components = components(&provider, &sink, metrics);
        let root = root.clone();
        async move { run_components(components, &root).await }
    });

    let client = reqwest::Client::new();

    let structured = client
        .post(&url)
        .header("content-type", "application/cloudevents+json")
        .body(
            json!({
                "specversion": "1.0",
                "id": "structured-1",
                "source": "https://vc01/sdk",
                "type": "com.vmware.event.router/event",
                "subject": "VmCreatedEvent",
                "data": {"Key": 6}
            })
            .to_string(),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(structured.status(), StatusCode::OK);

    let binary = client
        .post(&url)
        .header("ce-specversion", "1.0")
        .header("ce-id", "binary-1")
        .header("ce-source", "https://vc01/sdk")
        .header("ce-type", "com.vmware.event.router/event")
        .header("ce-subject", "VmRemovedEvent")
        .header("content-type", "application/json")
        .body(json!({"Key": 7}).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(binary.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let malformed = client.post(&url).body("not json").send().await.unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    root.cancel();
    assert_ok!(router.await.unwrap());

    let stats = provider.stats();
    assert_eq!(stats.events_total(), Some(2));
    assert_eq!(stats.events_err(), Some(1));

    // listener is gone once the router stopped
    let late = reqwest::Client::new().post(&url).body("{}").send().await;
    assert!(late.is_err());
}

#[tokio::test]
async fn test_webhook_waits_for_slow_delivery() {
    let registry = Arc::new(StatsRegistry::new());
    let metrics = embedded(&registry);

    // slower than the metrics request timeout
    let sink = Arc::new(SlowSink {
        delay: HTTP_TIMEOUT + Duration::from_millis(250),
    });
    let provider = Arc::new(webhook(Arc::clone(&metrics) as Arc<dyn MetricsReceiver>));
    let url = format!("http://{}/webhook", provider.local_addr());
    let root = CancellationToken::new();

    let router = tokio::spawn({
        let components = components(&provider, &sink, metrics);
        let root = root.clone();
        async move { run_components(components, &root).await }
    });

    let response = reqwest::Client::new()
        .post(&url)
        .body(
            json!({
                "specversion": "1.0",
                "id": "slow-1",
                "source": "https://vc01/sdk",
                "type": "com.vmware.event.router/event",
                "subject": "VmPoweredOffEvent"
            })
            .to_string(),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    root.cancel();
    assert_ok!(router.await.unwrap());
    assert_eq!(provider.stats().events_total(), Some(1));
}

// ---- Full Router Test ----

#[tokio::test]
async fn test_router_runs_from_config() {
    let (sink, received) = recording_sink("ce-id").await;

    let config = parse_config(&format!(
        r#"
        [provider]
        type = "vcsim"
        name = "simulator"
        [provider.vcsim]
        interval_ms = 10
        max_events = 2

        [processor]
        type = "knative"
        name = "broker"
        [processor.knative]
        sink = "http://{sink}/"

        [metrics]
        type = "prometheus"
        name = "prom"
        [metrics.prometheus]
        bind_address = "127.0.0.1:0"
        "#
    ))
    .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), lifecycle::run(&config))
        .await
        .expect("finite simulation stops the router");
    assert_ok!(result);
    assert_eq!(*received.lock().unwrap(), vec!["0".to_string(), "1".to_string()]);
}

#[tokio::test]
async fn test_router_rejects_unusable_sink() {
    let config = parse_config(
        r#"
        [provider]
        type = "vcsim"
        name = "simulator"
        [provider.vcsim]

        [processor]
        type = "knative"
        name = "broker"
        [processor.knative]
        sink = "ftp://broker"

        [metrics]
        type = "default"
        name = "metrics"
        [metrics.default]
        bind_address = "127.0.0.1:0"
        "#,
    )
    .unwrap();

    let err = assert_err!(lifecycle::run(&config).await);
    assert!(matches!(err, RouterError::Construction("knative processor", _)));
}

// ---- Process Tests ----

#[cfg(unix)]
#[tokio::test]
async fn test_sigterm_stops_router_cleanly() {
    use std::process::Stdio;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::process::Command;

    let (sink, _received) = recording_sink("ce-id").await;
    let path = std::env::temp_dir().join(format!("event-router-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(
        &path,
        format!(
            r#"
            [provider]
            type = "vcsim"
            name = "simulator"
            [provider.vcsim]
            interval_ms = 20

            [processor]
            type = "knative"
            name = "broker"
            [processor.knative]
            sink = "http://{sink}/"

            [metrics]
            type = "default"
            name = "metrics"
            [metrics.default]
            bind_address = "127.0.0.1:0"
            "#
        ),
    )
    .unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_event-router"))
        .arg("--config")
        .arg(&path)
        .arg("--log-json")
        .env_remove("RUST_LOG")
        .env_remove("ROUTER_LOG_LEVEL")
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();
    let mut output = Vec::new();

    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(line) = lines.next_line().await.unwrap() {
            let streaming = line.contains("Simulating events");
            output.push(line);
            if streaming {
                break;
            }
        }
    })
    .await
    .expect("router starts streaming");
    // signal handlers are installed by a task spawned just before streaming
    tokio::time::sleep(Duration::from_millis(300)).await;

    let pid = child.id().unwrap().to_string();
    let signalled = std::process::Command::new("kill")
        .args(["-TERM", pid.as_str()])
        .status()
        .unwrap();
    assert!(signalled.success());

    let status = tokio::time::timeout(Duration::from_secs(20), async {
        while let Some(line) = lines.next_line().await.unwrap() {
            output.push(line);
        }
        child.wait().await.unwrap()
    })
    .await
    .expect("router exits after SIGTERM");
    std::fs::remove_file(&path).ok();

    let log = output.join("\n");
    assert!(status.success(), "exit status {status:?}, log:\n{log}");
    assert!(log.contains("Termination signal received"));
    assert!(log.contains("Simulator stopped"));
    assert!(log.contains("Knative processor stopped"));
}
