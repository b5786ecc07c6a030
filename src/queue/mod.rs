//! Task Queue + Event Bus (C10)
//! Mission: bounded worker pool with per-ticker dedup and a pub/sub event
//! bus feeding the SSE endpoints. Broadcast-channel fanout mirrors a plain
//! `tokio::sync::broadcast` sender shared across subscribers.

mod events;

pub use events::{TaskEvent, TaskEventKind};

use crate::error::{AppError, AppResult};
use crate::models::{Task, TaskStatus};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

struct Inner {
    tasks: HashMap<String, Task>,
    active_tickers: HashSet<String>,
}

/// Bounded task queue: at most one in-flight task per ticker, with a
/// semaphore capping total concurrent workers.
pub struct TaskQueue {
    inner: Mutex<Inner>,
    semaphore: Arc<Semaphore>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskQueue {
    pub fn new(max_concurrency: usize, event_buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(event_buffer);
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                active_tickers: HashSet::new(),
            }),
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            events: tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Register a new task for `ticker`, rejecting it if one is already
    /// active for the same ticker.
    pub fn enqueue(&self, ticker: &str, report_type: &str) -> AppResult<Task> {
        let mut inner = self.inner.lock();
        if inner.active_tickers.contains(ticker) {
            if let Some(existing) = inner.tasks.values().find(|t| t.ticker == ticker && !t.status.is_terminal()) {
                return Err(AppError::Duplicate(existing.task_id.clone()));
            }
        }
        let task = Task {
            task_id: Uuid::new_v4().to_string(),
            ticker: ticker.to_string(),
            report_type: report_type.to_string(),
            status: TaskStatus::Pending,
            progress: 0.0,
            message: "queued".into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };
        inner.active_tickers.insert(ticker.to_string());
        inner.tasks.insert(task.task_id.clone(), task.clone());
        self.publish(TaskEvent {
            task_id: task.task_id.clone(),
            kind: TaskEventKind::Created,
            progress: 0.0,
            message: "queued".into(),
            at: Utc::now(),
        });
        Ok(task)
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.inner.lock().tasks.get(task_id).cloned()
    }

    pub fn list(&self) -> Vec<Task> {
        self.inner.lock().tasks.values().cloned().collect()
    }

    /// Acquire a worker slot; the returned permit must be held for the
    /// duration of the task's execution.
    pub async fn acquire_slot(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.semaphore.clone().acquire_owned().await.expect("semaphore not closed")
    }

    pub fn mark_started(&self, task_id: &str) {
        self.update(task_id, TaskStatus::Processing, 0.1, "started", None);
        self.publish(TaskEvent {
            task_id: task_id.to_string(),
            kind: TaskEventKind::Started,
            progress: 0.1,
            message: "started".into(),
            at: Utc::now(),
        });
    }

    pub fn report_progress(&self, task_id: &str, progress: f64, message: &str) {
        self.update(task_id, TaskStatus::Processing, progress, message, None);
        self.publish(TaskEvent {
            task_id: task_id.to_string(),
            kind: TaskEventKind::Heartbeat,
            progress,
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    pub fn mark_completed(&self, task_id: &str) {
        self.finish(task_id, TaskStatus::Completed, None);
        self.publish(TaskEvent {
            task_id: task_id.to_string(),
            kind: TaskEventKind::Completed,
            progress: 1.0,
            message: "completed".into(),
            at: Utc::now(),
        });
    }

    pub fn mark_failed(&self, task_id: &str, error: String) {
        warn!(task_id, %error, "task failed");
        self.finish(task_id, TaskStatus::Failed, Some(error.clone()));
        self.publish(TaskEvent {
            task_id: task_id.to_string(),
            kind: TaskEventKind::Failed,
            progress: 1.0,
            message: error,
            at: Utc::now(),
        });
    }

    fn update(&self, task_id: &str, status: TaskStatus, progress: f64, message: &str, error: Option<String>) {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.status = status;
            task.progress = progress;
            task.message = message.to_string();
            task.error = error;
            if status == TaskStatus::Processing && task.started_at.is_none() {
                task.started_at = Some(Utc::now());
            }
        }
    }

    fn finish(&self, task_id: &str, status: TaskStatus, error: Option<String>) {
        let mut inner = self.inner.lock();
        let ticker = inner.tasks.get(task_id).map(|t| t.ticker.clone());
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.status = status;
            task.progress = 1.0;
            task.error = error;
            task.completed_at = Some(Utc::now());
        }
        if let Some(ticker) = ticker {
            inner.active_tickers.remove(&ticker);
        }
        info!(task_id, ?status, "task finished");
    }

    /// Broadcasting to zero subscribers is not an error — SSE delivery is
    /// best-effort, so this never fails the caller.
    fn publish(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ticker_is_rejected_while_active() {
        let queue = TaskQueue::new(4, 16);
        queue.enqueue("AAPL", "standard").unwrap();
        let err = queue.enqueue("AAPL", "standard").unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
    }

    #[test]
    fn ticker_freed_after_completion_allows_requeue() {
        let queue = TaskQueue::new(4, 16);
        let task = queue.enqueue("AAPL", "standard").unwrap();
        queue.mark_completed(&task.task_id);
        assert!(queue.enqueue("AAPL", "standard").is_ok());
    }

    #[tokio::test]
    async fn subscribers_receive_lifecycle_events() {
        let queue = TaskQueue::new(4, 16);
        let mut rx = queue.subscribe();
        let task = queue.enqueue("AAPL", "standard").unwrap();
        queue.mark_started(&task.task_id);
        queue.mark_completed(&task.task_id);
        let created = rx.recv().await.unwrap();
        assert!(matches!(created.kind, TaskEventKind::Created));
        let started = rx.recv().await.unwrap();
        assert!(matches!(started.kind, TaskEventKind::Started));
        let completed = rx.recv().await.unwrap();
        assert!(matches!(completed.kind, TaskEventKind::Completed));
    }
}
