//! Outward workflow events and the bus that carries them to observers.
//!
//! Built on `tokio::sync::broadcast`: any number of observers may subscribe,
//! and publishing with no subscribers is a no-op.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use worker::{ErrorKind, Severity};

/// Default broadcast buffer size.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Observable progress of a workflow run.
///
/// Serialises as `{"type": "<event name>", ...camelCase payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WorkflowEvent {
    WorkflowStart {
        workflow_id: String,
        thread_id: String,
    },
    JobStart {
        workflow_id: String,
        thread_id: String,
        job_id: String,
    },
    JobComplete {
        workflow_id: String,
        thread_id: String,
        job_id: String,
        state: Value,
        duration: i64,
    },
    WorkflowLog {
        workflow_id: String,
        thread_id: String,
        level: String,
        name: String,
        message: Vec<Value>,
        time: i64,
    },
    WorkflowComplete {
        workflow_id: String,
        state: Value,
        /// Milliseconds from start to completion.
        duration: i64,
        thread_id: String,
    },
    WorkflowError {
        workflow_id: String,
        thread_id: Option<String>,
        error_type: ErrorKind,
        severity: Severity,
        message: String,
    },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStart { .. } => "workflow-start",
            Self::JobStart { .. } => "job-start",
            Self::JobComplete { .. } => "job-complete",
            Self::WorkflowLog { .. } => "workflow-log",
            Self::WorkflowComplete { .. } => "workflow-complete",
            Self::WorkflowError { .. } => "workflow-error",
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            Self::WorkflowStart { workflow_id, .. }
            | Self::JobStart { workflow_id, .. }
            | Self::JobComplete { workflow_id, .. }
            | Self::WorkflowLog { workflow_id, .. }
            | Self::WorkflowComplete { workflow_id, .. }
            | Self::WorkflowError { workflow_id, .. } => workflow_id,
        }
    }
}

/// Multi-consumer bus for [`WorkflowEvent`]s.
///
/// Cloning the bus clones the sender, so every clone publishes to the same
/// subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
