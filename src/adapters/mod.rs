//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP servers and clients, upstream feeds,
//! downstream sinks). Each sub-module groups adapters by concern.
//!
//! Adapter categories:
//! - `http`: shared axum/reqwest plumbing (auth, timeouts, retries)
//! - `metrics`: stats publishing, embedded and Prometheus servers
//! - `providers`: vCenter, Horizon, webhook and simulator sources
//! - `processors`: OpenFaaS, AWS EventBridge and Knative sinks

pub mod http;
pub mod metrics;
pub mod processors;
pub mod providers;
