//! Event router behaviour against a fake provider and the in-process tag
//! revalidator.

mod common;

use common::{fast_retry, FakeProvider};
use serde_json::json;
use spiral_webhook_receiver::{
    cache::{CacheRevalidator, CacheTag, TagRevalidator},
    router::EventRouter,
};
use std::sync::Arc;

fn router_with(provider: Arc<FakeProvider>) -> (EventRouter, Arc<TagRevalidator>) {
    let cache = Arc::new(TagRevalidator::new());
    let router = EventRouter::new(
        provider,
        cache.clone() as Arc<dyn CacheRevalidator>,
        fast_retry(),
    );
    (router, cache)
}

fn inventory_payload() -> serde_json::Value {
    json!({
        "type": "inventory.count",
        "object": {
            "inventory_counts": [
                { "catalog_object_id": "VAR1", "location_id": "L1", "quantity": "3" }
            ]
        }
    })
}

#[tokio::test]
async fn order_events_invalidate_products_and_inventory() -> anyhow::Result<()> {
    let provider = Arc::new(FakeProvider::default());
    let (router, cache) = router_with(provider.clone());

    router
        .route("order.created", &json!({ "object": { "order": { "id": "O1" } } }))
        .await?;

    assert_eq!(cache.generation(CacheTag::Products).await, 1);
    assert_eq!(cache.generation(CacheTag::Inventory).await, 1);
    assert_eq!(provider.inventory_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn payment_and_unknown_events_only_log() -> anyhow::Result<()> {
    let (router, cache) = router_with(Arc::new(FakeProvider::default()));

    router.route("payment.created", &json!({ "id": "P1" })).await?;
    router.route("refund.updated", &json!({})).await?;
    router.route("team_member.created", &json!({})).await?;
    router.route("loyalty.account.created", &json!({})).await?;

    assert_eq!(cache.generation(CacheTag::Products).await, 0);
    assert_eq!(cache.generation(CacheTag::Inventory).await, 0);
    Ok(())
}

#[tokio::test]
async fn inventory_update_refreshes_then_invalidates() -> anyhow::Result<()> {
    let provider = Arc::new(FakeProvider::default());
    let (router, cache) = router_with(provider.clone());

    router
        .route("inventory.count.updated", &inventory_payload())
        .await?;

    assert_eq!(provider.inventory_calls(), 1);
    assert_eq!(cache.generation(CacheTag::Inventory).await, 1);
    assert_eq!(cache.generation(CacheTag::Products).await, 0);
    Ok(())
}

#[tokio::test]
async fn failed_inventory_refresh_still_invalidates() -> anyhow::Result<()> {
    let provider = Arc::new(FakeProvider::failing(503));
    let (router, cache) = router_with(provider.clone());

    router
        .route("inventory.count.updated", &inventory_payload())
        .await?;

    // 503 is retryable, so every allowed attempt is spent.
    assert_eq!(provider.inventory_calls(), 3);
    assert_eq!(cache.generation(CacheTag::Inventory).await, 1);
    Ok(())
}

#[tokio::test]
async fn client_errors_are_not_retried() -> anyhow::Result<()> {
    let provider = Arc::new(FakeProvider::failing(404));
    let (router, cache) = router_with(provider.clone());

    router.route("catalog.version.updated", &json!({})).await?;

    assert_eq!(provider.probe_calls(), 1);
    assert_eq!(cache.generation(CacheTag::Products).await, 1);
    Ok(())
}

#[tokio::test]
async fn inventory_update_without_ids_skips_refresh() -> anyhow::Result<()> {
    let provider = Arc::new(FakeProvider::default());
    let (router, cache) = router_with(provider.clone());

    router
        .route("inventory.count.updated", &json!({ "object": {} }))
        .await?;

    assert_eq!(provider.inventory_calls(), 0);
    assert_eq!(cache.generation(CacheTag::Inventory).await, 1);
    Ok(())
}

#[tokio::test]
async fn events_without_an_object_payload_still_run() -> anyhow::Result<()> {
    let provider = Arc::new(FakeProvider::default());
    let (router, cache) = router_with(provider.clone());

    router.route("payment.created", &json!(null)).await?;
    router.route("customer.updated", &json!("not an object")).await?;
    router.route("order.updated", &json!([])).await?;
    router.route("inventory.count.updated", &json!(null)).await?;
    router.route("mystery.event", &json!(null)).await?;

    assert_eq!(cache.generation(CacheTag::Products).await, 1);
    assert_eq!(cache.generation(CacheTag::Inventory).await, 2);
    assert_eq!(provider.inventory_calls(), 0);
    Ok(())
}
