//! Horizon Event Source - Audit Event Feed
//!
//! Logs in via `POST /rest/login` (domain, username, password) and
//! polls `GET /rest/external/v1/audit-events` with a time filter
//! starting at the newest event seen so far. Events sharing that
//! millisecond are de-duplicated by id. A `401` triggers one re-login;
//! the refresh token is revoked on close.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::polling::{EventSource, PollingProvider};
use crate::adapters::http::client::ensure_success;
use crate::adapters::http::{BasicCredentials, HttpClient, HttpClientConfig};
use crate::config::HorizonConfig;
use crate::domain::Event;
use crate::ports::MetricsReceiver;

const AUDIT_EVENTS_PATH: &str = "/rest/external/v1/audit-events";

#[derive(Debug, Deserialize)]
struct Tokens {
    access_token: String,
    refresh_token: String,
}

/// One Horizon audit event.
#[derive(Debug, Clone, Deserialize)]
struct AuditEvent {
    id: i64,
    /// Event class, e.g. `VLSI_USERLOGGEDIN`.
    #[serde(rename = "type")]
    kind: String,
    /// Epoch milliseconds.
    time: i64,
    #[serde(flatten)]
    details: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default)]
struct Session {
    tokens: Option<Tokens>,
    /// Timestamp of the newest event returned (epoch ms).
    since: Option<i64>,
    /// Ids already returned at `since`.
    seen_at_since: HashSet<i64>,
}

/// Audit event feed of one Horizon connection server.
pub struct HorizonSource {
    address: String,
    domain: String,
    client: HttpClient,
    credentials: BasicCredentials,
    session: Mutex<Session>,
}

impl HorizonSource {
    pub fn new(config: &HorizonConfig, client: HttpClient) -> Result<Self> {
        let address = config.address.trim_end_matches('/').to_string();
        ensure!(
            address.starts_with("http://") || address.starts_with("https://"),
            "horizon address {:?} must be an http(s) URL",
            config.address
        );
        ensure!(!config.domain.is_empty(), "horizon domain must not be empty");
        let credentials = BasicCredentials::from_auth(config.auth.as_ref())
            .context("horizon provider requires basic auth credentials")?;

        Ok(Self {
            address,
            domain: config.domain.clone(),
            client,
            credentials,
            session: Mutex::new(Session {
                // only events from now on
                since: Some(Utc::now().timestamp_millis()),
                ..Session::default()
            }),
        })
    }

    async fn login(&self) -> Result<Tokens> {
        let request = self
            .client
            .inner()
            .post(format!("{}/rest/login", self.address))
            .json(&json!({
                "domain": self.domain,
                "username": self.credentials.username(),
                "password": self.credentials.password(),
            }));
        let response = ensure_success(self.client.send(request).await?).await?;
        let tokens = response.json().await.context("invalid login response")?;
        info!(address = %self.address, domain = %self.domain, "Logged in to Horizon");
        Ok(tokens)
    }

    async fn fetch(&self, access_token: &str, since: Option<i64>) -> Result<Option<Vec<AuditEvent>>> {
        let mut request = self
            .client
            .inner()
            .get(format!("{}{AUDIT_EVENTS_PATH}", self.address))
            .bearer_auth(access_token);
        if let Some(since) = since {
            let filter = json!({ "type": "GreaterThanOrEquals", "name": "time", "value": since });
            request = request.query(&[("filter", filter.to_string())]);
        }

        let response = self.client.send(request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let records = ensure_success(response)
            .await?
            .json()
            .await
            .context("invalid horizon audit event feed")?;
        Ok(Some(records))
    }

    fn to_event(&self, record: AuditEvent) -> Event {
        let mut data = record.details;
        data.insert("id".to_string(), record.id.into());
        data.insert("time".to_string(), record.time.into());
        let event = Event::new(
            self.address.clone(),
            record.kind,
            serde_json::Value::Object(data),
        )
        .with_id(record.id.to_string());

        match DateTime::<Utc>::from_timestamp_millis(record.time) {
            Some(time) => event.with_time(time),
            None => event,
        }
    }
}

/// Keep records newer than the cursor, advancing it.
fn advance(session: &mut Session, records: Vec<AuditEvent>) -> Vec<AuditEvent> {
    let mut fresh: Vec<_> = records
        .into_iter()
        .filter(|record| match session.since {
            Some(since) if record.time < since => false,
            Some(since) if record.time == since => !session.seen_at_since.contains(&record.id),
            _ => true,
        })
        .collect();
    fresh.sort_by_key(|record| (record.time, record.id));

    if let Some(newest) = fresh.last().map(|record| record.time) {
        if session.since != Some(newest) {
            session.seen_at_since.clear();
            session.since = Some(newest);
        }
        session.seen_at_since.extend(
            fresh
                .iter()
                .filter(|record| record.time == newest)
                .map(|record| record.id),
        );
    }
    fresh
}

#[async_trait]
impl EventSource for HorizonSource {
    fn address(&self) -> &str {
        &self.address
    }

    async fn poll(&self) -> Result<Vec<Event>> {
        let mut session = self.session.lock().await;

        if session.tokens.is_none() {
            session.tokens = Some(self.login().await?);
        }
        let access_token = session
            .tokens
            .as_ref()
            .map(|tokens| tokens.access_token.clone())
            .unwrap_or_default();

        let records = if let Some(records) = self.fetch(&access_token, session.since).await? {
            records
        } else {
            debug!("Horizon token expired, logging in again");
            let tokens = self.login().await?;
            let records = self
                .fetch(&tokens.access_token, session.since)
                .await?
                .context("horizon rejected a fresh token")?;
            session.tokens = Some(tokens);
            records
        };

        let fresh = advance(&mut session, records);
        Ok(fresh.into_iter().map(|record| self.to_event(record)).collect())
    }

    async fn close(&self) -> Result<()> {
        let Some(tokens) = self.session.lock().await.tokens.take() else {
            return Ok(());
        };

        let request = self
            .client
            .inner()
            .post(format!("{}/rest/logout", self.address))
            .json(&json!({ "refresh_token": tokens.refresh_token }));
        ensure_success(self.client.send(request).await?)
            .await
            .context("could not log out of horizon")?;
        info!(address = %self.address, "Logged out of Horizon");
        Ok(())
    }
}

/// Build the Horizon provider from its settings.
pub fn provider(
    config: &HorizonConfig,
    name: &str,
    root_cas: &[PathBuf],
    receiver: Arc<dyn MetricsReceiver>,
) -> Result<PollingProvider<HorizonSource>> {
    let client = HttpClient::new(HttpClientConfig::with_root_cas(root_cas).insecure(config.insecure_ssl))?;
    let source = HorizonSource::new(config, client)?;
    Ok(PollingProvider::new(
        source,
        name,
        Duration::from_millis(config.poll_interval_ms),
        receiver,
    ))
}
