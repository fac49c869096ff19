//! OS Signal Handling - Process Termination
//!
//! [`wait_for_shutdown_signal`] completes when the process is asked to
//! stop: `SIGINT`, `SIGTERM` or `SIGQUIT` on Unix, Ctrl-C elsewhere.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wait for a termination signal.
///
/// Returns `Err` if the signal handlers could not be registered.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
  use tokio::signal::unix::{SignalKind, signal};

  let mut sigint = signal(SignalKind::interrupt())?;
  let mut sigterm = signal(SignalKind::terminate())?;
  let mut sigquit = signal(SignalKind::quit())?;

  tokio::select! {
    _ = tokio::signal::ctrl_c() => {},
    _ = sigint.recv() => {},
    _ = sigterm.recv() => {},
    _ = sigquit.recv() => {},
  }
  Ok(())
}

/// Wait for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
  tokio::signal::ctrl_c().await
}

/// Cancel `root` once a termination signal arrives.
///
/// Returns without cancelling when `root` is cancelled first. If the
/// handlers cannot be installed the router keeps running without
/// signal-driven shutdown.
pub async fn cancel_on_signal(root: CancellationToken) {
  tokio::select! {
    () = root.cancelled() => {}
    result = wait_for_shutdown_signal() => match result {
      Ok(()) => {
        info!("Termination signal received, shutting down");
        root.cancel();
      }
      Err(e) => error!(error = %e, "Could not install signal handlers"),
    },
  }
}
