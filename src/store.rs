use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(String),
    #[error("store returned an error: {0}")]
    Command(String),
    #[error("unexpected store response: {0}")]
    Decode(String),
}

/// List primitives of a remote key-value store. Each call is atomic on the
/// store side; nothing here adds locking on top.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Push to the head. Returns the list length afterwards.
    async fn lpush(&self, key: &str, value: String) -> Result<u64, StoreError>;
    /// Pop from the tail.
    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Inclusive range with Redis index rules (negative counts from the tail).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;
    /// Remove up to `count` entries equal to `value`, scanning from the head.
    /// Returns how many were removed.
    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64, StoreError>;
}

/// Process-local list store for development and tests.
#[derive(Default)]
pub struct MemoryListStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, key: &str) -> usize {
        self.lists.lock().await.get(key).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn lpush(&self, key: &str, value: String) -> Result<u64, StoreError> {
        let mut lists = self.lists.lock().await;
        let list = lists.entry(key.to_string()).or_default();
        list.push_front(value);
        Ok(list.len() as u64)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut lists = self.lists.lock().await;
        Ok(lists.get_mut(key).and_then(VecDeque::pop_back))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let lists = self.lists.lock().await;
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as i64;
        let resolve = |idx: i64| if idx < 0 { len + idx } else { idx };
        let start = resolve(start).max(0);
        let stop = resolve(stop).min(len - 1);
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64, StoreError> {
        let mut lists = self.lists.lock().await;
        let Some(list) = lists.get_mut(key) else {
            return Ok(0);
        };
        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let mut removed = 0usize;
        if count >= 0 {
            let mut i = 0;
            while i < list.len() && removed < limit {
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                }
            }
        }
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_head_pop_tail_is_fifo() {
        let store = MemoryListStore::new();
        store.lpush("q", "a".into()).await.unwrap();
        store.lpush("q", "b".into()).await.unwrap();

        assert_eq!(store.rpop("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.rpop("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.rpop("q").await.unwrap(), None);
        assert_eq!(store.rpop("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lrange_follows_redis_indexing() {
        let store = MemoryListStore::new();
        for v in ["c", "b", "a"] {
            store.lpush("l", v.into()).await.unwrap();
        }

        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.lrange("l", 1, 1).await.unwrap(), vec!["b"]);
        assert_eq!(store.lrange("l", -2, 10).await.unwrap(), vec!["b", "c"]);
        assert!(store.lrange("l", 2, 1).await.unwrap().is_empty());
        assert!(store.lrange("nope", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lrem_removes_only_requested_count() {
        let store = MemoryListStore::new();
        for v in ["x", "y", "x", "x"] {
            store.lpush("l", v.into()).await.unwrap();
        }

        assert_eq!(store.lrem("l", 1, "x").await.unwrap(), 1);
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["x", "y", "x"]);
        assert_eq!(store.lrem("l", 0, "x").await.unwrap(), 2);
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["y"]);
        assert_eq!(store.lrem("l", 1, "missing").await.unwrap(), 0);
    }
}
