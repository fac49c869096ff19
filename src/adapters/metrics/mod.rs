//! Metrics Adapters - Stats Collection and Exposure
//!
//! - `publisher`: per-component stats owner with a 1s push timer
//! - `registry`: latest snapshot per component name
//! - `embedded`: JSON `/stats` endpoint with optional basic auth
//! - `prometheus`: text exposition `/metrics` endpoint
//! - `load`: host load average for the embedded endpoint

pub mod embedded;
pub mod load;
pub mod prometheus;
pub mod publisher;
pub mod registry;

pub use embedded::EmbeddedServer;
pub use self::prometheus::PrometheusServer;
pub use publisher::StatsPublisher;
pub use registry::StatsRegistry;
