//! Per-run execution context.
//!
//! One `ExecutionContext` exists per in-flight workflow. It owns the run's
//! mutable [`WorkflowState`]; only the lifecycle handlers mutate it, through
//! the `&mut` the orchestrator hands them. Nothing else holds a reference to
//! the state while the run is live.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::Span;
use worker::{ErrorKind, EventSender, Severity, WorkerCall, WorkerPool};

use crate::events::{EventBus, WorkflowEvent};
use crate::models::PlanOptions;

/// Sentinel `duration` while a run has not finished.
pub const DURATION_UNSET: i64 = -1;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl WorkflowStatus {
    /// `Done` and `Error` accept no further events.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// What went wrong, recorded on a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub error_type: ErrorKind,
    pub severity: Severity,
    pub message: String,
}

/// Runtime state of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub id: String,
    pub status: WorkflowStatus,
    pub start_time: Option<DateTime<Utc>>,
    /// Milliseconds; [`DURATION_UNSET`] until the run finishes.
    pub duration: i64,
    /// Worker unit that executed the run.
    pub thread_id: Option<String>,
    /// Final output state, set only on success.
    pub result: Option<Value>,
    pub error: Option<FailureRecord>,
}

impl WorkflowState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: WorkflowStatus::Pending,
            start_time: None,
            duration: DURATION_UNSET,
            thread_id: None,
            result: None,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Mutable state plus the logging, dispatch and event handles of one run.
pub struct ExecutionContext {
    state: WorkflowState,
    logger: Span,
    worker: Arc<dyn WorkerPool>,
    options: PlanOptions,
    events: EventBus,
}

impl ExecutionContext {
    /// Create a context with its own event bus.
    pub fn new(
        state: WorkflowState,
        logger: Span,
        worker: Arc<dyn WorkerPool>,
        options: PlanOptions,
    ) -> Self {
        Self {
            state,
            logger,
            worker,
            options,
            events: EventBus::default(),
        }
    }

    /// Publish to `events` instead of a private bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut WorkflowState {
        &mut self.state
    }

    /// Consume the context, keeping only the final state.
    pub fn into_state(self) -> WorkflowState {
        self.state
    }

    pub fn workflow_id(&self) -> &str {
        &self.state.id
    }

    pub fn logger(&self) -> &Span {
        &self.logger
    }

    pub fn options(&self) -> &PlanOptions {
        &self.options
    }

    pub fn worker(&self) -> &Arc<dyn WorkerPool> {
        &self.worker
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: WorkflowEvent) {
        self.events.publish(event);
    }

    /// Dispatch a call to the worker pool.
    pub async fn call_worker(
        &self,
        call: WorkerCall,
        events: EventSender,
    ) -> anyhow::Result<Value> {
        self.worker.call_worker(call, events).await
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use worker::mock::MockWorker;

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            WorkflowState::new("wf"),
            Span::none(),
            Arc::new(MockWorker::completing("t-1", json!({ "ok": true }))),
            PlanOptions::default(),
        )
    }

    #[test]
    fn new_state_is_pending_with_unset_duration() {
        let state = WorkflowState::new("wf");
        assert_eq!(state.status, WorkflowStatus::Pending);
        assert_eq!(state.duration, DURATION_UNSET);
        assert!(state.start_time.is_none() && state.thread_id.is_none() && state.result.is_none());
    }

    #[test]
    fn only_done_and_error_are_terminal() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(WorkflowStatus::Done.is_terminal());
        assert!(WorkflowStatus::Error.is_terminal());
    }

    #[tokio::test]
    async fn emitted_events_reach_subscribers() {
        let ctx = context();
        let mut rx = ctx.subscribe();
        ctx.emit(WorkflowEvent::WorkflowStart {
            workflow_id: "wf".into(),
            thread_id: "t-1".into(),
        });
        assert_eq!(rx.recv().await.unwrap().name(), "workflow-start");
    }

    #[tokio::test]
    async fn shared_bus_is_used_when_given() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let ctx = context().with_events(bus);

        ctx.emit(WorkflowEvent::WorkflowStart {
            workflow_id: "wf".into(),
            thread_id: "t-1".into(),
        });
        assert_eq!(rx.recv().await.unwrap().workflow_id(), "wf");
    }

    #[tokio::test]
    async fn call_worker_passes_through_to_the_pool() {
        let ctx = context();
        let (tx, _rx) = worker::event_channel();
        let result = ctx
            .call_worker(WorkerCall::run("wf", json!({}), json!({}), json!({})), tx)
            .await
            .unwrap();
        assert_eq!(result, json!({ "ok": true }));
    }

    #[test]
    fn state_serializes_camel_case() {
        let value = serde_json::to_value(WorkflowState::new("wf")).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["duration"], -1);
        assert!(value.get("startTime").is_some());
        assert!(value.get("threadId").is_some());
    }
}
