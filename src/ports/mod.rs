//! Ports Layer - Capability Contracts
//!
//! Defines the interfaces (traits) the lifecycle controller requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `Provider`: Upstream event source
//! - `Processor`: Downstream event sink
//! - `MetricsReceiver` / `MetricsServer`: Stats collection and exposure

pub mod metrics;
pub mod processor;
pub mod provider;

pub use metrics::{MetricsReceiver, MetricsServer};
pub use processor::Processor;
pub use provider::Provider;
