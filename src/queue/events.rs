//! Event shapes fanned out over the task queue's broadcast channel and
//! re-framed as SSE by the API layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Created,
    Started,
    Heartbeat,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub kind: TaskEventKind,
    pub progress: f64,
    pub message: String,
    pub at: DateTime<Utc>,
}
