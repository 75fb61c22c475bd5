use crate::{TaskId, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle events published by executors and orchestrators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    TaskSubmitted {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: TaskId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowStarted {
        workflow_id: WorkflowId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        workflow_id: WorkflowId,
        step: String,
        result: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        workflow_id: WorkflowId,
        step: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for execution events.
///
/// Emitting with no subscribers drops the event.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
