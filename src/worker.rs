use crate::queue::{DeadLetterOutcome, WebhookQueue};
use crate::router::EventHandler;
use crate::types::{ErrorRecord, WebhookTask};
use serde::Serialize;
use tracing::{error, info, warn};

pub const DEFAULT_DRAIN_LIMIT: usize = 50;
const MAX_LOG_PAYLOAD_CHARS: usize = 2048;

/// What to do with a task whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log and move on; the task is gone from the queue.
    #[default]
    LogOnly,
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    /// Tasks pulled by this drain that did not succeed. Not a queue depth.
    pub remaining: usize,
}

/// Parse a caller-supplied batch size, falling back to `default` for
/// anything that is not a positive finite number.
pub fn parse_limit(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n.ceil() as usize)
        .unwrap_or(default)
}

/// Pull up to `limit` tasks and run each through `handler`, one at a time in
/// dequeue order. A failing task never stops the batch.
pub async fn drain(
    queue: &WebhookQueue,
    handler: &dyn EventHandler,
    limit: usize,
    policy: FailurePolicy,
) -> DrainReport {
    let tasks = queue.dequeue(limit).await;
    let pulled = tasks.len();
    let mut processed = 0;

    for task in tasks {
        match handler.handle(&task.event, &task.payload).await {
            Ok(()) => processed += 1,
            Err(e) => {
                error!(
                    event = %task.event,
                    task_id = %task.id,
                    error = %e,
                    payload_preview = preview(&task),
                    "webhook task failed"
                );
                if policy == FailurePolicy::DeadLetter {
                    escalate(queue, task, ErrorRecord::capture(&e).with_name(e.kind())).await;
                }
            }
        }
    }

    info!(pulled, processed, "webhook drain finished");
    DrainReport {
        processed,
        remaining: pulled - processed,
    }
}

async fn escalate(queue: &WebhookQueue, mut task: WebhookTask, error: ErrorRecord) {
    task.attempts += 1;
    match queue.move_to_dead_letter(&task, error).await {
        DeadLetterOutcome::Stored { .. } => {}
        DeadLetterOutcome::Disabled => {
            warn!(event = %task.event, task_id = %task.id, "dead letter skipped; queue disabled")
        }
        DeadLetterOutcome::PushFailed => {
            error!(event = %task.event, task_id = %task.id, "task lost; dead letter push failed")
        }
    }
}

fn preview(task: &WebhookTask) -> &str {
    match task.raw_body.char_indices().nth(MAX_LOG_PAYLOAD_CHARS) {
        Some((idx, _)) => &task.raw_body[..idx],
        None => &task.raw_body,
    }
}
