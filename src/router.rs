//! Dispatch of provider webhook events to their side effects.
//!
//! Event names are parsed into [`EventKind`] so that every supported event
//! has an explicit arm; names we don't know land in [`EventKind::Unknown`]
//! and are logged, not rejected.

use crate::cache::{CacheRevalidator, CacheTag};
use crate::provider::{CatalogProvider, ProviderError};
use crate::retry::{with_retry, RetryOptions};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Order(OrderEvent),
    Payment(PaymentEvent),
    Refund(RefundEvent),
    Customer(CustomerEvent),
    InventoryCountUpdated,
    CatalogVersionUpdated,
    Loyalty(String),
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Created,
    Updated,
    FulfillmentUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEvent {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundEvent {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerEvent {
    Created,
    Updated,
    Deleted,
}

const LOYALTY_EVENTS: &[&str] = &[
    "loyalty.account.created",
    "loyalty.account.updated",
    "loyalty.account.deleted",
    "loyalty.event.created",
    "loyalty.program.created",
    "loyalty.program.updated",
    "loyalty.promotion.created",
    "loyalty.promotion.updated",
];

impl EventKind {
    pub fn parse(event: &str) -> Self {
        match event {
            "order.created" => Self::Order(OrderEvent::Created),
            "order.updated" => Self::Order(OrderEvent::Updated),
            "order.fulfillment.updated" => Self::Order(OrderEvent::FulfillmentUpdated),
            "payment.created" => Self::Payment(PaymentEvent::Created),
            "payment.updated" => Self::Payment(PaymentEvent::Updated),
            "refund.created" => Self::Refund(RefundEvent::Created),
            "refund.updated" => Self::Refund(RefundEvent::Updated),
            "customer.created" => Self::Customer(CustomerEvent::Created),
            "customer.updated" => Self::Customer(CustomerEvent::Updated),
            "customer.deleted" => Self::Customer(CustomerEvent::Deleted),
            "inventory.count.updated" => Self::InventoryCountUpdated,
            "catalog.version.updated" => Self::CatalogVersionUpdated,
            other if LOYALTY_EVENTS.contains(&other) => Self::Loyalty(other.to_string()),
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Failure of an [`EventHandler`]. The built-in router absorbs provider
/// failures itself; handlers that call out to other integrations report
/// theirs through `Handler`.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("{event} handler failed")]
    Handler {
        event: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RouterError {
    pub fn handler(
        event: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Handler {
            event: event.into(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handler { .. } => "HandlerFailed",
        }
    }
}

/// Seam between the drain loop and the router, so the loop can be driven by
/// a fake in tests.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &str, payload: &Value) -> Result<(), RouterError>;
}

pub struct EventRouter {
    provider: Arc<dyn CatalogProvider>,
    cache: Arc<dyn CacheRevalidator>,
    retry: RetryOptions<ProviderError>,
}

impl EventRouter {
    pub fn new(
        provider: Arc<dyn CatalogProvider>,
        cache: Arc<dyn CacheRevalidator>,
        retry: RetryOptions<ProviderError>,
    ) -> Self {
        Self {
            provider,
            cache,
            retry,
        }
    }

    pub async fn route(&self, event: &str, payload: &Value) -> Result<(), RouterError> {
        match EventKind::parse(event) {
            EventKind::Order(kind) => self.on_order(kind, payload).await,
            EventKind::Payment(_) | EventKind::Refund(_) | EventKind::Customer(_) => {
                info!(event, object_id = object_id(payload), "webhook event received");
                Ok(())
            }
            EventKind::InventoryCountUpdated => self.on_inventory_count_updated(payload).await,
            EventKind::CatalogVersionUpdated => self.on_catalog_version_updated(payload).await,
            EventKind::Loyalty(name) => {
                info!(event = %name, object_id = object_id(payload), "loyalty event received");
                Ok(())
            }
            EventKind::Unknown(name) => {
                info!(event = %name, "unhandled webhook event");
                Ok(())
            }
        }
    }

    async fn on_order(&self, kind: OrderEvent, payload: &Value) -> Result<(), RouterError> {
        info!(?kind, order_id = object_id(payload), "order event received");
        self.cache.revalidate_tag(CacheTag::Products).await;
        self.cache.revalidate_tag(CacheTag::Inventory).await;
        Ok(())
    }

    async fn on_inventory_count_updated(&self, payload: &Value) -> Result<(), RouterError> {
        let ids = catalog_object_ids(payload);
        if ids.is_empty() {
            warn!("inventory update without catalog object id; skipping refresh");
        } else {
            let provider = &self.provider;
            let ids = &ids;
            match with_retry(
                move || async move { provider.batch_retrieve_inventory_counts(ids).await },
                &self.retry,
            )
            .await
            {
                Ok(counts) => info!(?ids, counts = counts.len(), "inventory counts refreshed"),
                Err(e) => warn!(?ids, error = %e, "inventory refresh failed"),
            }
        }
        // Invalidate even when the refresh failed.
        self.cache.revalidate_tag(CacheTag::Inventory).await;
        Ok(())
    }

    async fn on_catalog_version_updated(&self, payload: &Value) -> Result<(), RouterError> {
        let updated_at = payload
            .pointer("/object/catalog_version/updated_at")
            .and_then(Value::as_str);
        let provider = &self.provider;
        match with_retry(move || async move { provider.catalog_probe().await }, &self.retry).await {
            Ok(probe) => info!(updated_at, objects = probe.object_ids.len(), "catalog probe refreshed"),
            Err(e) => warn!(updated_at, error = %e, "catalog probe failed"),
        }
        self.cache.revalidate_tag(CacheTag::Products).await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventHandler for EventRouter {
    async fn handle(&self, event: &str, payload: &Value) -> Result<(), RouterError> {
        self.route(event, payload).await
    }
}

fn object_id(payload: &Value) -> Option<&str> {
    payload
        .get("id")
        .or_else(|| payload.pointer("/object/id"))
        .and_then(Value::as_str)
}

/// Catalog object ids named by an inventory update, in payload order.
pub fn catalog_object_ids(payload: &Value) -> Vec<String> {
    let mut ids: Vec<String> = payload
        .pointer("/object/inventory_counts")
        .and_then(Value::as_array)
        .map(|counts| {
            counts
                .iter()
                .filter_map(|c| c.get("catalog_object_id").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    if ids.is_empty() {
        if let Some(id) = payload
            .pointer("/object/catalog_object_id")
            .and_then(Value::as_str)
        {
            ids.push(id.to_string());
        }
    }
    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
    ids
}
