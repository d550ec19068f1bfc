//! Shared fixtures for the integration tests: fakes for the provider and the
//! event handler, plus helpers for driving the axum router in-process.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use spiral_webhook_receiver::{
    cache::TagRevalidator,
    http_server::{self, AppState, ReceiverSettings},
    provider::{CatalogProbe, CatalogProvider, InventoryCount, ProviderError},
    queue::WebhookQueue,
    retry::RetryOptions,
    router::{EventHandler, RouterError},
    store::{ListStore, MemoryListStore},
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const SECRET: &str = "whsec_test_signature_key";
pub const PROCESS_TOKEN: &str = "drain-token";

/// Provider that either answers with canned data or fails every call with
/// the configured HTTP status.
#[derive(Default)]
pub struct FakeProvider {
    pub fail_with_status: Option<u16>,
    pub inventory_calls: AtomicU32,
    pub probe_calls: AtomicU32,
}

impl FakeProvider {
    pub fn failing(status: u16) -> Self {
        Self {
            fail_with_status: Some(status),
            ..Self::default()
        }
    }

    pub fn inventory_calls(&self) -> u32 {
        self.inventory_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> u32 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    fn failure(&self) -> Option<ProviderError> {
        self.fail_with_status.map(|status| ProviderError::Http {
            status,
            message: "upstream said no".into(),
        })
    }
}

#[async_trait]
impl CatalogProvider for FakeProvider {
    async fn batch_retrieve_inventory_counts(
        &self,
        catalog_object_ids: &[String],
    ) -> Result<Vec<InventoryCount>, ProviderError> {
        self.inventory_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure() {
            return Err(err);
        }
        Ok(catalog_object_ids
            .iter()
            .map(|id| InventoryCount {
                catalog_object_id: id.clone(),
                location_id: Some("L1".into()),
                quantity: Some("4".into()),
                state: Some("IN_STOCK".into()),
            })
            .collect())
    }

    async fn catalog_probe(&self) -> Result<CatalogProbe, ProviderError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure() {
            return Err(err);
        }
        Ok(CatalogProbe {
            object_ids: vec!["ITEM1".into()],
            latest_time: Some("2024-05-01T00:00:00Z".into()),
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("rejected by test handler")]
pub struct Rejected;

/// Handler that records every event it sees, failing the ones named in
/// `fail_on`.
#[derive(Default)]
pub struct RecordingHandler {
    pub fail_on: Vec<String>,
    seen: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn failing_on(event: &str) -> Self {
        Self {
            fail_on: vec![event.to_string()],
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &str, _payload: &Value) -> Result<(), RouterError> {
        self.seen.lock().unwrap().push(event.to_string());
        if self.fail_on.iter().any(|e| e == event) {
            return Err(RouterError::handler(event, Rejected));
        }
        Ok(())
    }
}

/// Millisecond-scale retries so failure paths stay fast.
pub fn fast_retry() -> RetryOptions<ProviderError> {
    RetryOptions {
        retries: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
        ..RetryOptions::for_provider()
    }
}

pub fn settings() -> ReceiverSettings {
    ReceiverSettings {
        signature_key: Some(SECRET.to_string()),
        test_merchant_prefix: "6SSW".to_string(),
        process_token: Some(PROCESS_TOKEN.to_string()),
        default_limit: 50,
        ..ReceiverSettings::default()
    }
}

pub fn memory_queue() -> (Arc<MemoryListStore>, WebhookQueue) {
    let store = Arc::new(MemoryListStore::new());
    let queue = WebhookQueue::new(Some(store.clone() as Arc<dyn ListStore>), Some("test"));
    (store, queue)
}

pub fn app(
    settings: ReceiverSettings,
    queue: WebhookQueue,
    handler: Arc<dyn EventHandler>,
    cache: Arc<TagRevalidator>,
) -> Router {
    http_server::router(AppState::new(settings, queue, handler, cache))
}

/// Run one request through the router and decode the JSON body
/// (`Value::Null` when the body is empty).
pub async fn send(app: Router, request: Request<Body>) -> anyhow::Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}
