//! Events a worker unit reports back while it runs a workflow.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Channel handle a worker uses to report lifecycle events.
pub type EventSender = mpsc::UnboundedSender<WorkerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<WorkerEvent>;

/// Create a fresh event channel for one worker call.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A structured log line produced inside the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: String,
    pub name: String,
    pub message: Vec<Value>,
    pub time: i64,
}

/// Lifecycle events emitted by a worker unit, in the order it observes them:
/// `workflow-start`, then any job and log events, then `workflow-complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WorkerEvent {
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
        /// Milliseconds spent in the job.
        duration: i64,
    },
    Log {
        workflow_id: String,
        thread_id: String,
        message: LogMessage,
    },
    WorkflowComplete {
        workflow_id: String,
        thread_id: String,
        state: Value,
    },
}

impl WorkerEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::WorkflowStart { workflow_id, .. }
            | Self::JobStart { workflow_id, .. }
            | Self::JobComplete { workflow_id, .. }
            | Self::Log { workflow_id, .. }
            | Self::WorkflowComplete { workflow_id, .. } => workflow_id,
        }
    }

    pub fn thread_id(&self) -> &str {
        match self {
            Self::WorkflowStart { thread_id, .. }
            | Self::JobStart { thread_id, .. }
            | Self::JobComplete { thread_id, .. }
            | Self::Log { thread_id, .. }
            | Self::WorkflowComplete { thread_id, .. } => thread_id,
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStart { .. } => "workflow-start",
            Self::JobStart { .. } => "job-start",
            Self::JobComplete { .. } => "job-complete",
            Self::Log { .. } => "log",
            Self::WorkflowComplete { .. } => "workflow-complete",
        }
    }
}
