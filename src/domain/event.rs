//! Routed event model.
//!
//! Events travel through the router in CloudEvents 1.0 shape. The
//! *category* of an event (the key processors count invocations under)
//! is its `subject`, e.g. `VmPoweredOnEvent`, falling back to `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// CloudEvents specification version emitted by the router.
pub const SPEC_VERSION: &str = "1.0";

/// Default `type` attribute for events produced by the router.
pub const EVENT_TYPE: &str = "com.vmware.event.router/event";

/// Default `datacontenttype` attribute.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Media type of structured-mode CloudEvents.
pub const CLOUDEVENTS_JSON: &str = "application/cloudevents+json";

/// A single routed event in CloudEvents shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier within `source`.
    pub id: String,
    /// URI of the system that produced the event.
    pub source: String,
    /// CloudEvents `type` attribute.
    #[serde(rename = "type")]
    pub event_type: String,
    /// CloudEvents `specversion` attribute.
    #[serde(default = "default_spec_version")]
    pub specversion: String,
    /// Upstream event class, used as the routing category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Time the upstream system recorded the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Media type of `data`.
    #[serde(default = "default_content_type")]
    pub datacontenttype: String,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Event {
    /// Create an event with a generated id and the current time.
    pub fn new(
        source: impl Into<String>,
        category: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: EVENT_TYPE.to_string(),
            specversion: SPEC_VERSION.to_string(),
            subject: Some(category.into()),
            time: Some(Utc::now()),
            datacontenttype: JSON_CONTENT_TYPE.to_string(),
            data,
        }
    }

    /// Replace the generated id with an upstream one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the event time with the upstream timestamp.
    #[must_use]
    pub const fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Routing category: the subject when present, otherwise the type.
    pub fn category(&self) -> &str {
        match self.subject.as_deref() {
            Some(subject) if !subject.is_empty() => subject,
            _ => &self.event_type,
        }
    }
}

fn default_spec_version() -> String {
    SPEC_VERSION.to_string()
}

fn default_content_type() -> String {
    JSON_CONTENT_TYPE.to_string()
}
