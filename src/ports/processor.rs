//! Processor Port - Downstream Event Sink Interface
//!
//! A processor owns the connection to one downstream system and
//! delivers individual events handed to it by the provider.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::Event;
use crate::error::RouterError;

/// Trait for downstream event sinks.
///
/// Implementors push a processor `EventStats` snapshot to their
/// metrics receiver on a fixed interval, counting one success or
/// failure per delivery under the event's category.
#[async_trait]
pub trait Processor: Send + Sync {
  /// Deliver one event downstream.
  ///
  /// The provider awaits this call before fetching the next event, so
  /// at most one event is outstanding in the pipeline.
  async fn process(&self, event: &Event) -> Result<(), RouterError>;

  /// Release downstream resources.
  ///
  /// Idempotent. Called once, after streaming has stopped.
  async fn shutdown(&self, cancel: CancellationToken) -> Result<(), RouterError>;
}
