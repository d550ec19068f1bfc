use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Storefront cache tags the webhook pipeline invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTag {
    Products,
    Inventory,
}

impl CacheTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Inventory => "inventory",
        }
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Revalidate-by-tag. Fire-and-forget and idempotent: implementations log
/// their own failures.
#[async_trait]
pub trait CacheRevalidator: Send + Sync {
    async fn revalidate_tag(&self, tag: CacheTag);
}

/// Tracks a generation counter per tag so the storefront can detect
/// invalidation, and optionally notifies an external revalidation hook.
pub struct TagRevalidator {
    generations: RwLock<BTreeMap<CacheTag, u64>>,
    hook: Option<RevalidateHook>,
}

struct RevalidateHook {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl TagRevalidator {
    pub fn new() -> Self {
        Self {
            generations: RwLock::new(BTreeMap::new()),
            hook: None,
        }
    }

    pub fn with_hook(url: &str, secret: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            generations: RwLock::new(BTreeMap::new()),
            hook: Some(RevalidateHook {
                client,
                url: url.to_string(),
                secret,
            }),
        })
    }

    pub async fn generation(&self, tag: CacheTag) -> u64 {
        self.generations.read().await.get(&tag).copied().unwrap_or(0)
    }

    pub async fn snapshot(&self) -> BTreeMap<CacheTag, u64> {
        let generations = self.generations.read().await;
        [CacheTag::Products, CacheTag::Inventory]
            .into_iter()
            .map(|tag| (tag, generations.get(&tag).copied().unwrap_or(0)))
            .collect()
    }
}

impl Default for TagRevalidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheRevalidator for TagRevalidator {
    async fn revalidate_tag(&self, tag: CacheTag) {
        let generation = {
            let mut generations = self.generations.write().await;
            let entry = generations.entry(tag).or_insert(0);
            *entry += 1;
            *entry
        };
        debug!(%tag, generation, "cache tag revalidated");

        let Some(hook) = &self.hook else {
            return;
        };
        let mut req = hook.client.post(&hook.url).query(&[("tag", tag.as_str())]);
        if let Some(secret) = &hook.secret {
            req = req.bearer_auth(secret);
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(%tag, status = %resp.status(), "revalidation hook rejected request"),
            Err(e) => warn!(%tag, error = %e, "revalidation hook unreachable"),
        }
    }
}
