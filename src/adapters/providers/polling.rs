//! Polling Provider - Shared Loop for Feed-based Sources
//!
//! vCenter and Horizon expose their events as feeds that must be
//! polled. `PollingProvider` owns the loop: poll on a fixed interval,
//! retry failed polls with exponential backoff, hand every returned
//! event to the processor in order, and surface a `Stream` error once
//! the retries are exhausted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::deliver;
use crate::adapters::metrics::StatsPublisher;
use crate::domain::{Event, EventStats};
use crate::error::RouterError;
use crate::ports::{MetricsReceiver, Processor, Provider};

/// A pollable upstream event feed.
///
/// Sources track their own position in the feed, so each successful
/// `poll` returns only events not returned before.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Address reported in stats.
    fn address(&self) -> &str;

    /// Fetch the events recorded since the previous successful poll, oldest first.
    async fn poll(&self) -> anyhow::Result<Vec<Event>>;

    /// Release the upstream session.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Backoff for failed polls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Provider driving an [`EventSource`].
pub struct PollingProvider<S> {
    source: S,
    interval: Duration,
    retry: RetryPolicy,
    publisher: Arc<StatsPublisher>,
    closed: CancellationToken,
    released: AtomicBool,
}

impl<S: EventSource> PollingProvider<S> {
    pub fn new(
        source: S,
        name: &str,
        interval: Duration,
        receiver: Arc<dyn MetricsReceiver>,
    ) -> Self {
        let stats = EventStats::provider(source.address());
        Self {
            source,
            interval,
            retry: RetryPolicy::default(),
            publisher: Arc::new(StatsPublisher::new(name, stats, receiver)),
            closed: CancellationToken::new(),
            released: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Stats of this provider.
    pub fn stats(&self) -> EventStats {
        self.publisher.snapshot()
    }

    /// Poll once, retrying transient failures.
    async fn poll_with_retry(&self) -> Result<Vec<Event>, RouterError> {
        let mut attempt = 0;
        loop {
            match self.source.poll().await {
                Ok(events) => return Ok(events),
                Err(e) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    warn!(error = %format!("{e:#}"), attempt, delay_ms = delay.as_millis(), "Poll failed, retrying");
                    sleep(delay).await;
                }
                Err(e) => {
                    return Err(RouterError::Stream(e.context(format!(
                        "giving up on {} after {} attempts",
                        self.source.address(),
                        attempt + 1
                    ))));
                }
            }
        }
    }

    fn stopping(&self, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.closed.is_cancelled()
    }
}

#[async_trait]
impl<S: EventSource> Provider for PollingProvider<S> {
    #[instrument(skip_all, fields(provider = %self.publisher.name()))]
    async fn stream(
        &self,
        cancel: CancellationToken,
        processor: Arc<dyn Processor>,
    ) -> Result<(), RouterError> {
        self.publisher.start(cancel.clone());
        info!(address = %self.source.address(), interval_ms = self.interval.as_millis(), "Polling for events");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = 'stream: loop {
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                () = self.closed.cancelled() => break Ok(()),
                polled = async {
                    ticker.tick().await;
                    self.poll_with_retry().await
                } => polled,
            };

            let events = match polled {
                Ok(events) => events,
                Err(e) => break Err(e),
            };
            if !events.is_empty() {
                debug!(count = events.len(), "Received events");
            }

            for event in &events {
                if self.stopping(&cancel) {
                    break 'stream Ok(());
                }
                deliver(processor.as_ref(), event, &self.publisher).await;
            }
        };

        self.publisher.push();
        result
    }

    async fn shutdown(&self, _cancel: CancellationToken) -> Result<(), RouterError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.closed.cancel();
        self.source
            .close()
            .await
            .map_err(RouterError::Shutdown)?;
        info!(provider = %self.publisher.name(), "Provider stopped");
        Ok(())
    }
}
