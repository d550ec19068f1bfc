use crate::store::{ListStore, StoreError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// `ListStore` backed by a managed Redis exposed over REST: every command is
/// a POST of the command array, authorised with a bearer token.
pub struct UpstashStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashStore {
    pub fn new(base_url: &str, token: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn command(&self, args: Value) -> Result<Value, StoreError> {
        let resp = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = resp.status();
        let body: CommandResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("HTTP {status}: {e}")))?;

        if let Some(err) = body.error {
            return Err(StoreError::Command(err));
        }
        if !status.is_success() {
            return Err(StoreError::Command(format!("HTTP {status}")));
        }
        Ok(body.result)
    }
}

fn as_count(value: Value) -> Result<u64, StoreError> {
    value
        .as_u64()
        .ok_or_else(|| StoreError::Decode(format!("expected integer, got {value}")))
}

#[async_trait]
impl ListStore for UpstashStore {
    async fn lpush(&self, key: &str, value: String) -> Result<u64, StoreError> {
        as_count(self.command(json!(["LPUSH", key, value])).await?)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.command(json!(["RPOP", key])).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        match self
            .command(json!(["LRANGE", key, start.to_string(), stop.to_string()]))
            .await?
        {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => Ok(items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect()),
            other => Err(StoreError::Decode(format!("expected array, got {other}"))),
        }
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64, StoreError> {
        as_count(
            self.command(json!(["LREM", key, count.to_string(), value]))
                .await?,
        )
    }
}
