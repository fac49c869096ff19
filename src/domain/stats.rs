//! Event throughput statistics reported by providers and processors.
//!
//! An `EventStats` record is owned by exactly one component and pushed
//! to the metrics receiver every [`PUSH_INTERVAL`]. Providers carry
//! event totals and a rate, processors carry per-category invocation
//! outcomes. The role is fixed at construction, so a record can never
//! carry both sets of counters.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Interval at which providers and processors push their stats.
pub const PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Which side of the pipeline reported a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsKind {
    /// Upstream event source.
    Provider,
    /// Downstream event sink.
    Processor,
}

impl fmt::Display for StatsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider => write!(f, "provider"),
            Self::Processor => write!(f, "processor"),
        }
    }
}

/// Success and failure counts for one event category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationDetails {
    /// Deliveries acknowledged by the downstream sink.
    pub success_count: u64,
    /// Deliveries that failed.
    pub failure_count: u64,
}

impl InvocationDetails {
    /// Record a successful invocation.
    pub const fn success(&mut self) {
        self.success_count += 1;
    }

    /// Record a failed invocation.
    pub const fn failure(&mut self) {
        self.failure_count += 1;
    }

    /// Total invocations recorded.
    pub const fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum Counters {
    Provider {
        events_total: u64,
        events_err: u64,
        events_per_sec: f64,
    },
    Processor {
        invocations: BTreeMap<String, InvocationDetails>,
    },
}

/// Snapshot of one component's throughput counters.
///
/// The reporting name is not part of the record: receivers store
/// snapshots under a caller-chosen key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventStats {
    #[serde(rename = "type")]
    kind: StatsKind,
    address: String,
    started: DateTime<Utc>,
    #[serde(flatten)]
    counters: Counters,
    /// `events_total` at the last rate computation.
    #[serde(skip)]
    rate_mark: u64,
}

impl EventStats {
    /// Stats for a provider connected to `address`.
    pub fn provider(address: impl Into<String>) -> Self {
        Self {
            kind: StatsKind::Provider,
            address: address.into(),
            started: Utc::now(),
            counters: Counters::Provider {
                events_total: 0,
                events_err: 0,
                events_per_sec: 0.0,
            },
            rate_mark: 0,
        }
    }

    /// Stats for a processor delivering to `address`.
    pub fn processor(address: impl Into<String>) -> Self {
        Self {
            kind: StatsKind::Processor,
            address: address.into(),
            started: Utc::now(),
            counters: Counters::Processor {
                invocations: BTreeMap::new(),
            },
            rate_mark: 0,
        }
    }

    pub const fn kind(&self) -> StatsKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub const fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Events received by a provider; `None` for processors.
    pub const fn events_total(&self) -> Option<u64> {
        match self.counters {
            Counters::Provider { events_total, .. } => Some(events_total),
            Counters::Processor { .. } => None,
        }
    }

    /// Events a provider could not hand off; `None` for processors.
    pub const fn events_err(&self) -> Option<u64> {
        match self.counters {
            Counters::Provider { events_err, .. } => Some(events_err),
            Counters::Processor { .. } => None,
        }
    }

    /// Provider throughput over the last push interval.
    pub const fn events_per_sec(&self) -> Option<f64> {
        match self.counters {
            Counters::Provider { events_per_sec, .. } => Some(events_per_sec),
            Counters::Processor { .. } => None,
        }
    }

    /// Per-category outcomes of a processor; `None` for providers.
    pub const fn invocations(&self) -> Option<&BTreeMap<String, InvocationDetails>> {
        match &self.counters {
            Counters::Processor { invocations } => Some(invocations),
            Counters::Provider { .. } => None,
        }
    }

    /// Count one received event. Ignored on processor stats.
    pub const fn record_event(&mut self, delivered: bool) {
        if let Counters::Provider {
            events_total,
            events_err,
            ..
        } = &mut self.counters
        {
            *events_total += 1;
            if !delivered {
                *events_err += 1;
            }
        }
    }

    /// Count one delivery outcome for `category`. Ignored on provider stats.
    pub fn record_invocation(&mut self, category: &str, success: bool) {
        if let Counters::Processor { invocations } = &mut self.counters {
            let details = invocations.entry(category.to_string()).or_default();
            if success {
                details.success();
            } else {
                details.failure();
            }
        }
    }

    /// Recompute `events_per_sec` from the events seen since the last call.
    pub fn refresh_rate(&mut self, elapsed: Duration) {
        if let Counters::Provider {
            events_total,
            events_per_sec,
            ..
        } = &mut self.counters
        {
            let seconds = elapsed.as_secs_f64();
            if seconds > 0.0 {
                #[allow(clippy::cast_precision_loss)]
                let delta = (*events_total - self.rate_mark) as f64;
                *events_per_sec = delta / seconds;
            }
            self.rate_mark = *events_total;
        }
    }
}

impl fmt::Display for EventStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_fields_present_processor_absent() {
        let stats = EventStats::provider("https://vc01");
        assert_eq!(stats.kind(), StatsKind::Provider);
        assert_eq!(stats.events_total(), Some(0));
        assert_eq!(stats.events_err(), Some(0));
        assert_eq!(stats.events_per_sec(), Some(0.0));
        assert!(stats.invocations().is_none());
    }

    #[test]
    fn test_processor_ignores_provider_counters() {
        let mut stats = EventStats::processor("http://gateway:8080");
        stats.record_event(true);
        stats.refresh_rate(Duration::from_secs(1));
        assert!(stats.events_total().is_none());
        assert!(stats.events_per_sec().is_none());
        assert_eq!(stats.invocations().map(BTreeMap::len), Some(0));
    }

    #[test]
    fn test_invocations_counted_per_category() {
        let mut stats = EventStats::processor("http://gateway:8080");
        stats.record_invocation("VmPoweredOnEvent", true);
        stats.record_invocation("VmPoweredOnEvent", false);
        stats.record_invocation("VmCreatedEvent", true);

        let invocations = stats.invocations().unwrap();
        assert_eq!(
            invocations["VmPoweredOnEvent"],
            InvocationDetails {
                success_count: 1,
                failure_count: 1
            }
        );
        assert_eq!(invocations["VmCreatedEvent"].total(), 1);
    }

    #[test]
    fn test_rate_uses_events_since_last_refresh() {
        let mut stats = EventStats::provider("sim");
        for _ in 0..10 {
            stats.record_event(true);
        }
        stats.refresh_rate(Duration::from_secs(2));
        assert_eq!(stats.events_per_sec(), Some(5.0));

        stats.record_event(false);
        stats.refresh_rate(Duration::from_secs(1));
        assert_eq!(stats.events_per_sec(), Some(1.0));
        assert_eq!(stats.events_total(), Some(11));
        assert_eq!(stats.events_err(), Some(1));
    }

    #[test]
    fn test_json_shape() {
        let mut stats = EventStats::processor("http://broker");
        stats.record_invocation("VmRemovedEvent", true);

        let value: serde_json::Value = serde_json::from_str(&stats.to_string()).unwrap();
        assert_eq!(value["type"], "processor");
        assert_eq!(value["address"], "http://broker");
        assert_eq!(value["invocations"]["VmRemovedEvent"]["success_count"], 1);
        assert!(value.get("events_total").is_none());
        assert!(value.get("rate_mark").is_none());
    }
}
