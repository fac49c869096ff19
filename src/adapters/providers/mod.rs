//! Provider Adapters - Upstream Event Sources
//!
//! - `vcenter`: vCenter event feed (session login + polling)
//! - `horizon`: Horizon audit event feed (token login + polling)
//! - `webhook`: inbound CloudEvents over HTTP
//! - `simulator`: synthetic VM events (deprecated)
//! - `polling`: shared poll/retry loop for the feed providers

pub mod horizon;
pub mod polling;
pub mod simulator;
pub mod vcenter;
pub mod webhook;

use tracing::{debug, warn};

use crate::adapters::metrics::StatsPublisher;
use crate::domain::Event;
use crate::ports::Processor;

pub use horizon::HorizonSource;
pub use polling::{EventSource, PollingProvider, RetryPolicy};
pub use simulator::SimulatorProvider;
pub use vcenter::VCenterSource;
pub use webhook::WebhookProvider;

/// Hand one event to `processor` and count the outcome.
///
/// Delivery errors are logged and counted, never propagated: a single
/// failed event must not end the stream.
pub async fn deliver(processor: &dyn Processor, event: &Event, publisher: &StatsPublisher) -> bool {
    match processor.process(event).await {
        Ok(()) => {
            debug!(provider = %publisher.name(), id = %event.id, category = %event.category(), "Event delivered");
            publisher.record_event(true);
            true
        }
        Err(e) => {
            warn!(provider = %publisher.name(), id = %event.id, category = %event.category(), error = %e, "Could not deliver event");
            publisher.record_event(false);
            false
        }
    }
}
