//! Provider Port - Upstream Event Source Interface
//!
//! A provider owns the connection to one upstream system and hands
//! every event it receives to a [`Processor`], one at a time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RouterError;
use crate::ports::processor::Processor;

/// Trait for upstream event sources.
///
/// Implementors push a provider `EventStats` snapshot to their
/// metrics receiver on a fixed interval.
#[async_trait]
pub trait Provider: Send + Sync {
  /// Stream events into `processor` until `cancel` fires or the upstream fails.
  ///
  /// Every event is passed to `processor.process` exactly once, in
  /// upstream order, and the call is awaited before the next event is
  /// fetched. Once `cancel` is observed no further delivery starts.
  /// Per-event delivery errors are counted and never end the stream.
  async fn stream(
    &self,
    cancel: CancellationToken,
    processor: Arc<dyn Processor>,
  ) -> Result<(), RouterError>;

  /// Release upstream resources.
  ///
  /// Idempotent. `cancel` fires when the shutdown grace period is over.
  async fn shutdown(&self, cancel: CancellationToken) -> Result<(), RouterError>;
}
