//! Outbound HTTP Client - Retrying reqwest Wrapper
//!
//! Shared by the polling providers and all processors. Adds the
//! configured root certificates, request timeout and exponential
//! backoff retries on transport errors, `429` and `5xx` responses.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Certificate, Client, RequestBuilder, Response, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for the outbound HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum retries on transient errors.
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff).
    pub retry_base_delay: Duration,
    /// PEM bundles added to the trust store.
    pub root_cas: Vec<PathBuf>,
    /// Accept invalid server certificates.
    pub insecure: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            root_cas: Vec::new(),
            insecure: false,
        }
    }
}

impl HttpClientConfig {
    /// Default settings trusting the given root certificates.
    pub fn with_root_cas(root_cas: &[PathBuf]) -> Self {
        Self {
            root_cas: root_cas.to_vec(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }
}

/// HTTP client with retries and custom trust anchors.
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// Underlying HTTP client.
    http: Client,
    /// Client configuration.
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new client, loading every configured root certificate.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(2);

        for path in &config.root_cas {
            let pem = std::fs::read(path)
                .with_context(|| format!("could not read root CA bundle {}", path.display()))?;
            let certs = Certificate::from_pem_bundle(&pem)
                .with_context(|| format!("invalid root CA bundle {}", path.display()))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if config.insecure {
            warn!("TLS certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().context("Failed to build HTTP client")?;
        Ok(Self { http, config })
    }

    /// Access the underlying client to build requests.
    pub const fn inner(&self) -> &Client {
        &self.http
    }

    /// Send a request, retrying transient failures.
    ///
    /// Returns the first response that is neither `429` nor `5xx`.
    /// Other non-success statuses are returned to the caller as-is.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis(), "Retrying request");
                sleep(delay).await;
            }

            let req = request
                .try_clone()
                .context("Failed to clone request")?;

            match req.send().await {
                Ok(response) => match response.status() {
                    StatusCode::TOO_MANY_REQUESTS => {
                        warn!(url = %response.url(), "Rate limited, backing off");
                        last_error = Some(anyhow::anyhow!("rate limited by {}", response.url()));
                    }
                    status if status.is_server_error() => {
                        warn!(status = %status, url = %response.url(), "Server error, retrying");
                        last_error = Some(anyhow::anyhow!("server error {status} from {}", response.url()));
                    }
                    _ => return Ok(response),
                },
                Err(e) => {
                    warn!(error = %e, attempt, "Request failed");
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")))
    }
}

/// Turn a non-2xx response into an error carrying the response body.
pub async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("{url} returned {status}: {body}")
}
