//! Contracts between the orchestrator and the collaborators it drives.
//!
//! The orchestrator never spawns threads or processes itself. It hands work to
//! a [`WorkerPool`], resolves adaptors through an [`Autoinstaller`], and turns
//! job source into runnable source through a [`Compiler`].

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::{EventSender, Severity};

/// Name of the worker operation that runs a whole workflow.
pub const RUN_OPERATION: &str = "run";

/// A single request for a worker unit.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCall {
    /// Operation to invoke inside the worker, e.g. [`RUN_OPERATION`].
    pub operation: String,
    /// Workflow the call belongs to; every event the worker emits must carry it.
    pub workflow_id: String,
    /// Positional arguments for the operation.
    pub args: Vec<Value>,
}

impl WorkerCall {
    /// Build a `run` call: `[plan, input, options]`.
    pub fn run(workflow_id: impl Into<String>, plan: Value, input: Value, options: Value) -> Self {
        Self {
            operation: RUN_OPERATION.to_owned(),
            workflow_id: workflow_id.into(),
            args: vec![plan, input, options],
        }
    }
}

/// The pool of isolated worker units.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Dispatch one call to a worker unit.
    ///
    /// Lifecycle events are pushed into `events` as they happen. The returned
    /// value is the final workflow state. Failures may be any error; those
    /// carrying a [`crate::RunError`] keep their classification.
    async fn call_worker(&self, call: WorkerCall, events: EventSender) -> anyhow::Result<Value>;

    /// Tell the pool a unit failed with the given severity.
    async fn dispose(&self, thread_id: &str, severity: Severity);
}

/// Resolves an adaptor specifier to a local module path.
#[async_trait]
pub trait Autoinstaller: Send + Sync {
    async fn install(&self, specifier: &str) -> anyhow::Result<PathBuf>;
}

/// Turns job source into executable source.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, step_id: &str, expression: &str) -> anyhow::Result<String>;
}
