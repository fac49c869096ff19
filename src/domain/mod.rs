//! Domain layer - Routed events and throughput statistics.
//!
//! Pure data types shared by every provider, processor and metrics
//! server. Nothing here performs I/O.

pub mod event;
pub mod stats;

pub use event::Event;
pub use stats::{EventStats, InvocationDetails, PUSH_INTERVAL, StatsKind};
