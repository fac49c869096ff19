//! Processor Adapters - Downstream Event Sinks
//!
//! - `openfaas`: topic-routed function invocation via the OpenFaaS gateway
//! - `event_bridge`: AWS EventBridge `PutEvents`
//! - `knative`: CloudEvents HTTP binding to a Knative sink
//! - `sigv4`: AWS request signing

pub mod event_bridge;
pub mod knative;
pub mod openfaas;
pub mod sigv4;

use anyhow::{Context, ensure};
use reqwest::Url;
use tracing::{debug, warn};

use crate::adapters::metrics::StatsPublisher;
use crate::domain::Event;
use crate::error::RouterError;

pub use event_bridge::EventBridgeProcessor;
pub use knative::KnativeProcessor;
pub use openfaas::OpenFaasProcessor;

/// Parse an `http(s)` base URL.
pub fn http_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid URL {raw:?}"))?;
    ensure!(
        matches!(url.scheme(), "http" | "https"),
        "URL {raw:?} must use http or https"
    );
    ensure!(url.host_str().is_some(), "URL {raw:?} has no host");
    Ok(url)
}

/// Count one invocation outcome under the event's category.
fn record(
    publisher: &StatsPublisher,
    event: &Event,
    outcome: anyhow::Result<()>,
) -> Result<(), RouterError> {
    let category = event.category();
    match outcome {
        Ok(()) => {
            debug!(processor = %publisher.name(), id = %event.id, category, "Invocation succeeded");
            publisher.record_invocation(category, true);
            Ok(())
        }
        Err(e) => {
            warn!(processor = %publisher.name(), id = %event.id, category, error = %format!("{e:#}"), "Invocation failed");
            publisher.record_invocation(category, false);
            Err(RouterError::Delivery(e))
        }
    }
}
