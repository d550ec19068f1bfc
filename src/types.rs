use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A provider event waiting in the live queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTask {
    pub id: String,
    pub event: String,
    pub payload: Value,
    pub raw_body: String,
    pub enqueued_at: DateTime<Utc>,
    /// Only the dead-letter escalation policy ever raises this.
    pub attempts: u32,
}

impl WebhookTask {
    pub fn new(event: impl Into<String>, payload: Value, raw_body: Option<String>) -> Self {
        let raw_body = raw_body.unwrap_or_else(|| payload.to_string());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event: event.into(),
            payload,
            raw_body,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }
}

/// A task that failed processing, parked until an operator replays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterTask {
    #[serde(flatten)]
    pub task: WebhookTask,
    pub failed_at: DateTime<Utc>,
    pub error: ErrorRecord,
}

/// Structured snapshot of a processing failure, including its source chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorRecord>>,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            name: None,
            stack: None,
            cause: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Capture an error and every `source()` beneath it.
    pub fn capture(err: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            message: err.to_string(),
            name: None,
            stack: None,
            cause: err.source().map(|src| Box::new(Self::capture(src))),
        }
    }
}

/// Queue entry as read back from the store. Every field is optional so that
/// entries written by older producers still decode; `normalize` decides
/// whether the entry is usable.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTask {
    pub id: Option<String>,
    pub event: Option<String>,
    pub payload: Option<Value>,
    pub raw_body: Option<String>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub attempts: Option<u32>,
}

impl RawTask {
    /// Returns `None` for entries without an event name.
    pub fn normalize(self) -> Option<WebhookTask> {
        let event = self.event.filter(|e| !e.trim().is_empty())?;
        let payload = self.payload.unwrap_or_else(|| Value::Object(Default::default()));
        let raw_body = self.raw_body.unwrap_or_else(|| payload.to_string());
        Some(WebhookTask {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            event,
            payload,
            raw_body,
            enqueued_at: self.enqueued_at.unwrap_or_else(Utc::now),
            attempts: self.attempts.unwrap_or(0),
        })
    }
}

/// Inbound webhook body as the provider sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}
