use crate::store::ListStore;
use crate::types::{DeadLetterTask, ErrorRecord, RawTask, WebhookTask};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const DEFAULT_NAMESPACE: &str = "default";

/// Result of parking a failed task in the dead-letter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterOutcome {
    Stored { id: String },
    /// No store configured; the task only survives in the logs.
    Disabled,
    PushFailed,
}

/// FIFO webhook queue with a companion dead-letter list, both namespaced
/// per deployment. Without a store every operation degrades to a logged
/// no-op instead of failing.
#[derive(Clone)]
pub struct WebhookQueue {
    store: Option<Arc<dyn ListStore>>,
    live_key: String,
    dead_letter_key: String,
}

impl WebhookQueue {
    pub fn new(store: Option<Arc<dyn ListStore>>, namespace: Option<&str>) -> Self {
        let namespace = namespace
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .unwrap_or(DEFAULT_NAMESPACE);
        Self {
            store,
            live_key: format!("{namespace}:square:webhook:tasks"),
            dead_letter_key: format!("{namespace}:square:webhook:dead-letter"),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn live_key(&self) -> &str {
        &self.live_key
    }

    pub fn dead_letter_key(&self) -> &str {
        &self.dead_letter_key
    }

    /// Push a new task to the head of the live list. Failures are logged,
    /// never returned.
    pub async fn enqueue(&self, event: &str, payload: Value, raw_body: Option<String>) {
        let Some(store) = &self.store else {
            info!(event, "queue store not configured; skipping enqueue");
            return;
        };

        let task = WebhookTask::new(event, payload, raw_body);
        let entry = match serde_json::to_string(&task) {
            Ok(entry) => entry,
            Err(e) => {
                error!(event, task_id = %task.id, error = %e, "failed to serialize webhook task");
                return;
            }
        };

        match store.lpush(&self.live_key, entry).await {
            Ok(depth) => debug!(event, task_id = %task.id, depth, "webhook task enqueued"),
            Err(e) => error!(event, task_id = %task.id, error = %e, "failed to enqueue webhook task"),
        }
    }

    /// Pop up to `max_tasks` from the tail, oldest first. Entries that do
    /// not parse or carry no event name are dropped.
    pub async fn dequeue(&self, max_tasks: usize) -> Vec<WebhookTask> {
        let Some(store) = &self.store else {
            info!("queue store not configured; nothing to dequeue");
            return Vec::new();
        };

        let mut tasks = Vec::new();
        for _ in 0..max_tasks {
            let raw = match store.rpop(&self.live_key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to pop webhook task");
                    break;
                }
            };

            match serde_json::from_str::<RawTask>(&raw) {
                Ok(parsed) => match parsed.normalize() {
                    Some(task) => tasks.push(task),
                    None => warn!("dropping queued webhook task without event"),
                },
                Err(e) => warn!(error = %e, "dropping unparseable webhook task"),
            }
        }
        tasks
    }

    /// Park a failed task together with a snapshot of its error.
    pub async fn move_to_dead_letter(
        &self,
        task: &WebhookTask,
        error: ErrorRecord,
    ) -> DeadLetterOutcome {
        let Some(store) = &self.store else {
            warn!(event = %task.event, task_id = %task.id, "queue store not configured; dead letter dropped");
            return DeadLetterOutcome::Disabled;
        };

        let dead = DeadLetterTask {
            task: task.clone(),
            failed_at: Utc::now(),
            error,
        };
        let entry = match serde_json::to_string(&dead) {
            Ok(entry) => entry,
            Err(e) => {
                error!(event = %task.event, task_id = %task.id, error = %e, "failed to serialize dead letter");
                return DeadLetterOutcome::PushFailed;
            }
        };

        match store.lpush(&self.dead_letter_key, entry).await {
            Ok(depth) => {
                warn!(event = %task.event, task_id = %task.id, depth, "webhook task moved to dead letter");
                DeadLetterOutcome::Stored {
                    id: task.id.clone(),
                }
            }
            Err(e) => {
                error!(event = %task.event, task_id = %task.id, error = %e, "failed to push dead letter");
                DeadLetterOutcome::PushFailed
            }
        }
    }

    /// Dead-letter entries, newest first. Unparseable entries are skipped.
    pub async fn dead_letters(&self) -> Vec<DeadLetterTask> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.lrange(&self.dead_letter_key, 0, -1).await {
            Ok(entries) => entries
                .iter()
                .filter_map(|raw| serde_json::from_str(raw).ok())
                .collect(),
            Err(e) => {
                error!(error = %e, "failed to read dead letters");
                Vec::new()
            }
        }
    }

    /// Move one dead-lettered task back onto the live queue with a fresh
    /// timestamp and zero attempts. Returns false when the task cannot be
    /// found or rebuilt, or when any store call fails.
    pub async fn requeue_dead_letter(&self, task_id: &str) -> bool {
        let Some(store) = &self.store else {
            info!(task_id, "queue store not configured; cannot requeue");
            return false;
        };

        let entries = match store.lrange(&self.dead_letter_key, 0, -1).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(task_id, error = %e, "failed to read dead letters");
                return false;
            }
        };

        // Not atomic as a whole: two concurrent requeues of the same id can race.
        let Some((raw, parsed)) = entries.into_iter().find_map(|raw| {
            let parsed = serde_json::from_str::<RawTask>(&raw).ok()?;
            (parsed.id.as_deref() == Some(task_id)).then_some((raw, parsed))
        }) else {
            info!(task_id, "dead letter not found");
            return false;
        };

        let Some(task) = rebuild(parsed) else {
            warn!(task_id, "dead letter cannot be rebuilt");
            return false;
        };

        match store.lrem(&self.dead_letter_key, 1, &raw).await {
            Ok(0) => {
                info!(task_id, "dead letter already removed");
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                error!(task_id, error = %e, "failed to remove dead letter");
                return false;
            }
        }

        let entry = match serde_json::to_string(&task) {
            Ok(entry) => entry,
            Err(e) => {
                error!(task_id, error = %e, "failed to serialize requeued task");
                return false;
            }
        };
        match store.lpush(&self.live_key, entry).await {
            Ok(_) => {
                info!(task_id, event = %task.event, "dead letter requeued");
                true
            }
            Err(e) => {
                error!(task_id, error = %e, "failed to requeue dead letter");
                false
            }
        }
    }
}

fn rebuild(parsed: RawTask) -> Option<WebhookTask> {
    let event = parsed.event.filter(|e| !e.trim().is_empty())?;
    let raw_body = match (parsed.raw_body, &parsed.payload) {
        (Some(body), _) => body,
        (None, Some(payload)) => payload.to_string(),
        (None, None) => return None,
    };
    let payload = match parsed.payload {
        Some(payload) => payload,
        None => serde_json::from_str(&raw_body).ok()?,
    };
    Some(WebhookTask {
        id: parsed.id?,
        event,
        payload,
        raw_body,
        enqueued_at: Utc::now(),
        attempts: 0,
    })
}
