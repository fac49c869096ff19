//! Lifecycle Controller - Three Tasks, One Cancellation Scope
//!
//! Runs the metrics server, the event stream and the shutdown
//! coordinator side by side on a [`TaskGroup`]. Any task failing with
//! a non-cancellation error cancels the other two; the shutdown task
//! always runs to completion and only logs teardown errors.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::factory::{Components, build_components};
use super::signals::cancel_on_signal;
use super::task_group::TaskGroup;
use crate::adapters::metrics::StatsRegistry;
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::ports::{Processor, Provider};

/// Upper bound for each component's shutdown, and for the stream to
/// wind down before teardown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Build the components from `config` and run them until a termination
/// signal arrives or one of them fails.
pub async fn run(config: &RouterConfig) -> Result<(), RouterError> {
  let registry = Arc::new(StatsRegistry::new());
  let components = build_components(config, registry)?;

  let root = CancellationToken::new();
  let signals = tokio::spawn(cancel_on_signal(root.clone()));

  let result = run_components(components, &root).await;

  root.cancel();
  if let Err(e) = signals.await {
    warn!(error = %e, "Signal listener aborted");
  }
  result
}

/// Run already built components under a child scope of `root`.
///
/// Returns the first non-cancellation error of the metrics or stream
/// task. A stream that ends on its own stops the router cleanly.
pub async fn run_components(
  components: Components,
  root: &CancellationToken,
) -> Result<(), RouterError> {
  let Components {
    provider,
    processor,
    metrics,
  } = components;

  let mut group = TaskGroup::new(root);
  let scope = group.token();
  let stream_done = CancellationToken::new();

  group.spawn("metrics", {
    let scope = scope.clone();
    async move { metrics.run(scope).await }
  });

  group.spawn("stream", {
    let scope = scope.clone();
    let provider = Arc::clone(&provider);
    let processor = Arc::clone(&processor);
    let done = stream_done.clone();
    async move {
      let _done = done.drop_guard();
      let result = provider.stream(scope.clone(), processor).await;
      if result.is_ok() && !scope.is_cancelled() {
        info!("Event stream ended, stopping router");
        scope.cancel();
      }
      result
    }
  });

  group.spawn("shutdown", async move {
    scope.cancelled().await;
    info!("Shutting down router components");

    if timeout(SHUTDOWN_GRACE, stream_done.cancelled()).await.is_err() {
      warn!(grace = ?SHUTDOWN_GRACE, "Event stream still running, shutting down anyway");
    }

    for e in shutdown_all(provider.as_ref(), processor.as_ref()).await {
      warn!(error = %e, "Component shutdown failed");
    }
    info!("Router components stopped");
    Ok(())
  });

  group.wait().await
}

/// Shut down the provider, then the processor.
///
/// Both are always called. Each gets a fresh token that fires once
/// [`SHUTDOWN_GRACE`] is over; the returned errors are never fatal.
pub async fn shutdown_all(provider: &dyn Provider, processor: &dyn Processor) -> Vec<RouterError> {
  let mut errors = Vec::new();

  let cancel = CancellationToken::new();
  if let Err(e) = within_grace("provider", cancel.clone(), provider.shutdown(cancel)).await {
    errors.push(e);
  }

  let cancel = CancellationToken::new();
  if let Err(e) = within_grace("processor", cancel.clone(), processor.shutdown(cancel)).await {
    errors.push(e);
  }

  errors
}

async fn within_grace<F>(
  component: &'static str,
  cancel: CancellationToken,
  shutdown: F,
) -> Result<(), RouterError>
where
  F: Future<Output = Result<(), RouterError>>,
{
  match timeout(SHUTDOWN_GRACE, shutdown).await {
    Ok(result) => result,
    Err(_) => {
      cancel.cancel();
      Err(RouterError::Shutdown(anyhow!(
        "{component} did not shut down within {SHUTDOWN_GRACE:?}"
      )))
    }
  }
}
