//! Use Cases Layer - Router Orchestration
//!
//! Wires configured adapters into a running router and owns its
//! lifecycle.
//!
//! Use cases:
//! - `factory`: Build provider, processor and metrics server from config
//! - `lifecycle`: Run the three router tasks and coordinate shutdown
//! - `signals`: Turn OS termination signals into cancellation
//! - `task_group`: Concurrent tasks sharing one cancellation scope

pub mod factory;
pub mod lifecycle;
pub mod signals;
pub mod task_group;

pub use factory::{Components, build_components};
pub use lifecycle::{SHUTDOWN_GRACE, run, run_components, shutdown_all};
pub use task_group::TaskGroup;
