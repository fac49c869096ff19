//! Metrics Ports - Stats Receiver and Metrics Server Interfaces

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::EventStats;
use crate::error::RouterError;

/// Sink for periodic `EventStats` snapshots.
pub trait MetricsReceiver: Send + Sync {
  /// Store `stats` under `name`, replacing any earlier snapshot.
  ///
  /// The sender is responsible for picking a unique name.
  fn process(&self, name: &str, stats: &EventStats);
}

/// HTTP endpoint exposing the snapshots a receiver collected.
#[async_trait]
pub trait MetricsServer: MetricsReceiver {
  /// Serve until `cancel` fires, then drain in-flight requests.
  async fn run(&self, cancel: CancellationToken) -> Result<(), RouterError>;
}
