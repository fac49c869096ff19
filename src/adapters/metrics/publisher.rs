//! Stats Publisher - Periodic EventStats Push
//!
//! Each provider and processor owns one publisher. It holds the
//! component's mutable `EventStats` and, once started, pushes a copy to
//! the metrics receiver every [`PUSH_INTERVAL`] from a lightweight
//! timer that stops with the component's cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::domain::{EventStats, PUSH_INTERVAL};
use crate::ports::MetricsReceiver;

/// Owner of one component's stats and their push timer.
pub struct StatsPublisher {
    /// Key the stats are stored under in the receiver.
    name: String,
    stats: Mutex<EventStats>,
    receiver: Arc<dyn MetricsReceiver>,
    started: AtomicBool,
}

impl StatsPublisher {
    pub fn new(
        name: impl Into<String>,
        stats: EventStats,
        receiver: Arc<dyn MetricsReceiver>,
    ) -> Self {
        Self {
            name: name.into(),
            stats: Mutex::new(stats),
            receiver,
            started: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Count one event received by a provider.
    pub fn record_event(&self, delivered: bool) {
        self.lock().record_event(delivered);
    }

    /// Count one delivery outcome of a processor.
    pub fn record_invocation(&self, category: &str, success: bool) {
        self.lock().record_invocation(category, success);
    }

    /// Copy of the current stats.
    pub fn snapshot(&self) -> EventStats {
        self.lock().clone()
    }

    /// Push the current stats to the receiver.
    pub fn push(&self) {
        let stats = self.snapshot();
        self.receiver.process(&self.name, &stats);
    }

    /// Start the push timer. Returns `false` when it was already running
    /// or no tokio runtime is available.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> bool {
        let Ok(handle) = Handle::try_current() else {
            debug!(name = %self.name, "No runtime available, stats push disabled");
            return false;
        };

        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        handle.spawn(Arc::clone(self).run(cancel));
        true
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(PUSH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let stats = {
                let mut stats = self.lock();
                stats.refresh_rate(now - last);
                stats.clone()
            };
            last = now;

            trace!(name = %self.name, "Pushing stats");
            self.receiver.process(&self.name, &stats);
        }

        // final snapshot so the receiver sees the last counts
        self.push();
        debug!(name = %self.name, "Stats publisher stopped");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EventStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
