//! HTTP Plumbing Shared by Servers and Clients
//!
//! - `auth`: basic auth gate for inbound requests
//! - `client`: retrying outbound client with custom trust anchors
//! - request timeout middleware and cancellation-aware serving with a
//!   bounded drain window

pub mod auth;
pub mod client;

use std::future::IntoFuture;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use auth::{BasicCredentials, require_basic_auth};
pub use client::{HttpClient, HttpClientConfig};

/// Upper bound for handling one request on the metrics endpoints.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long in-flight requests may run after cancellation.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound every request handled by `router` to `limit`.
///
/// Slow requests are answered with `408 Request Timeout`.
pub fn with_timeout(router: Router, limit: Duration) -> Router {
    router.layer(middleware::from_fn(move |request: Request, next: Next| async move {
        enforce_timeout(limit, request, next).await
    }))
}

async fn enforce_timeout(limit: Duration, request: Request, next: Next) -> Response {
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => (StatusCode::REQUEST_TIMEOUT, "request timed out").into_response(),
    }
}

/// Serve `app` on `listener` until `cancel` fires.
///
/// After cancellation the listener stops accepting connections and
/// in-flight requests get [`DRAIN_TIMEOUT`] to finish; whatever is
/// still running after that is dropped.
pub async fn serve_until_cancelled(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let shutdown = cancel.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();
    tokio::pin!(server);

    let result = tokio::select! {
        result = &mut server => result.context("HTTP server stopped unexpectedly"),
        () = cancel.cancelled() => {
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut server).await {
                Ok(result) => result.context("HTTP server failed while draining"),
                Err(_) => {
                    warn!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "Drain window elapsed, dropping in-flight requests");
                    Ok(())
                }
            }
        }
    };

    if result.is_ok() {
        info!("HTTP server stopped");
    }
    result
}
