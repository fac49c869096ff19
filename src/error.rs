//! Router Error Taxonomy
//!
//! Every contract in `crate::ports` returns `RouterError`. Adapters use
//! `anyhow` internally and wrap at the boundary, so the lifecycle
//! controller only has to tell cancellation apart from real failures.

use thiserror::Error;

/// Errors surfaced by providers, processors, metrics servers and the
/// lifecycle controller.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Unreadable, unparseable or incomplete configuration.
    #[error("invalid configuration: {0:#}")]
    Config(anyhow::Error),

    /// A component could not be built (bad address, bad certificate, ...).
    #[error("could not construct {0}: {1:#}")]
    Construction(&'static str, anyhow::Error),

    /// The upstream connection failed and the provider gave up.
    #[error("event stream failed: {0:#}")]
    Stream(anyhow::Error),

    /// A single event could not be delivered downstream.
    #[error("event delivery failed: {0:#}")]
    Delivery(anyhow::Error),

    /// The metrics endpoint could not be served.
    #[error("metrics server failed: {0:#}")]
    Metrics(anyhow::Error),

    /// Releasing a component's resources failed.
    #[error("shutdown failed: {0:#}")]
    Shutdown(anyhow::Error),

    /// A concurrent router task panicked or was aborted.
    #[error("router task aborted: {0:#}")]
    Task(anyhow::Error),

    /// The shared cancellation scope was triggered.
    #[error("cancelled due to shutdown")]
    Cancelled,
}

impl RouterError {
    /// Whether this error only reports an expected cancellation.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_cancelled_is_cancellation() {
        assert!(RouterError::Cancelled.is_cancelled());
        assert!(!RouterError::Stream(anyhow::anyhow!("lost")).is_cancelled());
        assert!(!RouterError::Shutdown(anyhow::anyhow!("busy")).is_cancelled());
    }

    #[test]
    fn test_display_includes_context_chain() {
        let inner = anyhow::anyhow!("connection refused").context("could not reach vcenter");
        let err = RouterError::Construction("provider", inner);
        let text = err.to_string();
        assert!(text.starts_with("could not construct provider"));
        assert!(text.contains("could not reach vcenter"));
        assert!(text.contains("connection refused"));
    }
}
