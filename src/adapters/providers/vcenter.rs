//! vCenter Event Source - Session-authenticated Event Feed
//!
//! Logs in with basic auth (`POST /api/session`), then polls
//! `GET /api/events?after=<key>` with the `vmware-api-session-id`
//! header. Each record carries a monotonically increasing `key`, used
//! as the feed cursor. An expired session (`401`) triggers one
//! re-login; the session is deleted on close.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::polling::{EventSource, PollingProvider};
use crate::adapters::http::client::ensure_success;
use crate::adapters::http::{BasicCredentials, HttpClient, HttpClientConfig};
use crate::config::VCenterConfig;
use crate::domain::Event;
use crate::ports::MetricsReceiver;

/// Header carrying the session token.
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// One record of the vCenter event feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VCenterEvent {
    key: i64,
    /// Event class, e.g. `VmPoweredOnEvent`.
    event_type: String,
    created_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    details: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
    /// Key of the last event returned.
    cursor: Option<i64>,
}

/// Event feed of one vCenter server.
pub struct VCenterSource {
    address: String,
    client: HttpClient,
    credentials: BasicCredentials,
    session: Mutex<Session>,
}

impl VCenterSource {
    pub fn new(config: &VCenterConfig, client: HttpClient) -> Result<Self> {
        let address = config.address.trim_end_matches('/').to_string();
        ensure!(
            address.starts_with("http://") || address.starts_with("https://"),
            "vcenter address {:?} must be an http(s) URL",
            config.address
        );
        let credentials = BasicCredentials::from_auth(config.auth.as_ref())
            .context("vcenter provider requires basic auth credentials")?;

        Ok(Self {
            address,
            client,
            credentials,
            session: Mutex::new(Session::default()),
        })
    }

    async fn login(&self) -> Result<String> {
        let request = self
            .client
            .inner()
            .post(format!("{}/api/session", self.address))
            .basic_auth(self.credentials.username(), Some(self.credentials.password()));
        let response = ensure_success(self.client.send(request).await?).await?;
        let token: String = response.json().await.context("invalid session response")?;
        info!(address = %self.address, "Logged in to vCenter");
        Ok(token)
    }

    async fn fetch(&self, token: &str, cursor: Option<i64>) -> Result<Option<Vec<VCenterEvent>>> {
        let mut request = self
            .client
            .inner()
            .get(format!("{}/api/events", self.address))
            .header(SESSION_HEADER, token);
        if let Some(after) = cursor {
            request = request.query(&[("after", after)]);
        }

        let response = self.client.send(request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let records = ensure_success(response)
            .await?
            .json()
            .await
            .context("invalid vcenter event feed")?;
        Ok(Some(records))
    }

    fn to_event(&self, record: VCenterEvent) -> Event {
        let mut data = record.details;
        data.insert("Key".to_string(), record.key.into());
        let event = Event::new(
            format!("{}/sdk", self.address),
            record.event_type,
            serde_json::Value::Object(data),
        )
        .with_id(record.key.to_string());

        match record.created_time {
            Some(time) => event.with_time(time),
            None => event,
        }
    }
}

#[async_trait]
impl EventSource for VCenterSource {
    fn address(&self) -> &str {
        &self.address
    }

    async fn poll(&self) -> Result<Vec<Event>> {
        let mut session = self.session.lock().await;

        let token = match &session.token {
            Some(token) => token.clone(),
            None => {
                let token = self.login().await?;
                session.token = Some(token.clone());
                token
            }
        };

        let records = if let Some(records) = self.fetch(&token, session.cursor).await? {
            records
        } else {
            debug!("vCenter session expired, logging in again");
            session.token = None;
            let token = self.login().await?;
            session.token = Some(token.clone());
            self.fetch(&token, session.cursor)
                .await?
                .context("vcenter rejected a fresh session")?
        };

        let mut records: Vec<_> = records
            .into_iter()
            .filter(|record| session.cursor.is_none_or(|cursor| record.key > cursor))
            .collect();
        records.sort_by_key(|record| record.key);

        if let Some(last) = records.last() {
            session.cursor = Some(last.key);
        }
        Ok(records.into_iter().map(|record| self.to_event(record)).collect())
    }

    async fn close(&self) -> Result<()> {
        let Some(token) = self.session.lock().await.token.take() else {
            return Ok(());
        };

        let request = self
            .client
            .inner()
            .delete(format!("{}/api/session", self.address))
            .header(SESSION_HEADER, token);
        ensure_success(self.client.send(request).await?)
            .await
            .context("could not log out of vcenter")?;
        info!(address = %self.address, "Logged out of vCenter");
        Ok(())
    }
}

/// Build the vCenter provider from its settings.
pub fn provider(
    config: &VCenterConfig,
    name: &str,
    root_cas: &[PathBuf],
    receiver: Arc<dyn MetricsReceiver>,
) -> Result<PollingProvider<VCenterSource>> {
    let client = HttpClient::new(HttpClientConfig::with_root_cas(root_cas).insecure(config.insecure_ssl))?;
    let source = VCenterSource::new(config, client)?;
    Ok(PollingProvider::new(
        source,
        name,
        Duration::from_millis(config.poll_interval_ms),
        receiver,
    ))
}
