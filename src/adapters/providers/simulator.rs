//! Simulator Provider - Synthetic vCenter Events
//!
//! Generates VM lifecycle events on a fixed interval. Intended for
//! demos and smoke tests only; constructing it logs a deprecation
//! warning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::ensure;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::deliver;
use crate::adapters::metrics::StatsPublisher;
use crate::config::SimulatorConfig;
use crate::domain::{Event, EventStats};
use crate::error::RouterError;
use crate::ports::{MetricsReceiver, Processor, Provider};

/// Categories the simulator cycles through.
pub const CATEGORIES: [&str; 5] = [
    "VmPoweredOnEvent",
    "VmPoweredOffEvent",
    "VmCreatedEvent",
    "VmReconfiguredEvent",
    "VmRemovedEvent",
];

/// Provider emitting synthetic events until cancelled or `max_events` is reached.
pub struct SimulatorProvider {
    address: String,
    interval: Duration,
    max_events: u64,
    /// Events generated so far; also the event key.
    sequence: AtomicU64,
    publisher: Arc<StatsPublisher>,
    closed: CancellationToken,
}

impl SimulatorProvider {
    pub fn new(
        config: &SimulatorConfig,
        name: &str,
        receiver: Arc<dyn MetricsReceiver>,
    ) -> Result<Self, RouterError> {
        warn!(provider = %name, "The vcsim provider is deprecated and will be removed in a future release");

        let validate = || -> anyhow::Result<()> {
            ensure!(!config.address.is_empty(), "simulator address must not be empty");
            ensure!(config.interval_ms > 0, "simulator interval must be positive");
            Ok(())
        };
        validate().map_err(|e| RouterError::Construction("vcsim provider", e))?;

        Ok(Self {
            address: config.address.clone(),
            interval: Duration::from_millis(config.interval_ms),
            max_events: config.max_events,
            sequence: AtomicU64::new(0),
            publisher: Arc::new(StatsPublisher::new(
                name,
                EventStats::provider(&config.address),
                receiver,
            )),
            closed: CancellationToken::new(),
        })
    }

    /// Stats of this provider.
    pub fn stats(&self) -> EventStats {
        self.publisher.snapshot()
    }

    fn next_event(&self) -> Event {
        let key = self.sequence.fetch_add(1, Ordering::Relaxed);
        let index = usize::try_from(key % CATEGORIES.len() as u64).unwrap_or_default();
        let category = CATEGORIES[index];
        let vm = format!("vm-{:03}", key % 100);

        Event::new(
            self.address.clone(),
            category,
            json!({
                "Key": key,
                "CreatedTime": Utc::now(),
                "UserName": "simulator",
                "Vm": { "Name": vm },
                "FullFormattedMessage": format!("{category} for {vm}"),
            }),
        )
        .with_id(key.to_string())
    }

    fn exhausted(&self) -> bool {
        self.max_events > 0 && self.sequence.load(Ordering::Relaxed) >= self.max_events
    }
}

#[async_trait]
impl Provider for SimulatorProvider {
    #[instrument(skip_all, fields(provider = %self.publisher.name()))]
    async fn stream(
        &self,
        cancel: CancellationToken,
        processor: Arc<dyn Processor>,
    ) -> Result<(), RouterError> {
        self.publisher.start(cancel.clone());
        info!(address = %self.address, interval_ms = self.interval.as_millis(), "Simulating events");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.exhausted() {
                info!(events = self.max_events, "Simulation finished");
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.closed.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let event = self.next_event();
            deliver(processor.as_ref(), &event, &self.publisher).await;
        }

        self.publisher.push();
        Ok(())
    }

    async fn shutdown(&self, _cancel: CancellationToken) -> Result<(), RouterError> {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            info!(provider = %self.publisher.name(), "Simulator stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::metrics::StatsRegistry;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        categories: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Processor for Recorder {
        async fn process(&self, event: &Event) -> Result<(), RouterError> {
            self.categories.lock().unwrap().push(event.category().to_string());
            Ok(())
        }

        async fn shutdown(&self, _cancel: CancellationToken) -> Result<(), RouterError> {
            Ok(())
        }
    }

    fn config(max_events: u64) -> SimulatorConfig {
        SimulatorConfig {
            address: "simulator://test".to_string(),
            interval_ms: 10,
            max_events,
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut cfg = config(0);
        cfg.interval_ms = 0;
        let result = SimulatorProvider::new(&cfg, "sim", Arc::new(StatsRegistry::new()));
        assert!(matches!(result, Err(RouterError::Construction("vcsim provider", _))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_events() {
        let registry = Arc::new(StatsRegistry::new());
        let provider = SimulatorProvider::new(&config(3), "sim", registry.clone()).unwrap();
        let recorder = Arc::new(Recorder::default());

        provider
            .stream(CancellationToken::new(), recorder.clone())
            .await
            .unwrap();

        let seen = recorder.categories.lock().unwrap().clone();
        assert_eq!(seen, CATEGORIES[..3].to_vec());
        assert_eq!(registry.get("sim").unwrap().events_total(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_stream() {
        let provider = Arc::new(
            SimulatorProvider::new(&config(0), "sim", Arc::new(StatsRegistry::new())).unwrap(),
        );
        let recorder = Arc::new(Recorder::default());

        let task = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.stream(CancellationToken::new(), recorder).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        provider.shutdown(CancellationToken::new()).await.unwrap();
        provider.shutdown(CancellationToken::new()).await.unwrap();
        assert!(task.await.unwrap().is_ok());
        assert!(provider.stats().events_total().unwrap() > 0);
    }
}
