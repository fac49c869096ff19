//! Stats Registry - Latest Snapshot per Reporting Component
//!
//! Injectable replacement for a process-global stats map. Providers
//! and processors push into it, the embedded metrics server reads it.
//! Each push replaces the whole record for its key.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::domain::EventStats;
use crate::ports::MetricsReceiver;

/// Snapshot store keyed by reporting component name.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    snapshots: RwLock<BTreeMap<String, EventStats>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot stored under `name`.
    pub fn insert(&self, name: &str, stats: EventStats) {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), stats);
    }

    /// Latest snapshot for `name`.
    pub fn get(&self, name: &str) -> Option<EventStats> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Copy of every stored snapshot.
    pub fn snapshot(&self) -> BTreeMap<String, EventStats> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsReceiver for StatsRegistry {
    fn process(&self, name: &str, stats: &EventStats) {
        self.insert(name, stats.clone());
    }
}
