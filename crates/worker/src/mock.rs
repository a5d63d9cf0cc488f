//! Test doubles for the worker-side contracts.
//!
//! Useful in unit and integration tests where a real worker pool, compiler or
//! adaptor installer is either unavailable or irrelevant.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    Autoinstaller, Compiler, EventSender, LogMessage, RunError, Severity, WorkerCall, WorkerEvent,
    WorkerPool,
};

/// One scripted action performed by [`MockWorker`] before it resolves.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Emit `workflow-start`.
    Start,
    /// Emit `job-start` for the given job id.
    JobStart(String),
    /// Emit `job-complete` for the given job id with its output state.
    JobComplete(String, Value),
    /// Emit a `log` event.
    Log(LogMessage),
    /// Emit `workflow-complete` with the given state.
    Complete(Value),
    /// Wait before the next step.
    Pause(Duration),
}

/// How the call resolves once the script has played out.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Resolve with a value.
    Return(Value),
    /// Fail with a classified error.
    Fail(RunError),
    /// Fail with an unclassified error message.
    Throw(String),
    /// Never resolve.
    Hang,
}

/// A worker pool that plays a fixed script for every call and records what
/// it was asked to do.
pub struct MockWorker {
    /// Thread id reported in every emitted event.
    pub thread_id: String,
    pub script: Vec<MockStep>,
    pub outcome: MockOutcome,
    /// Every call received (in call order).
    pub calls: Arc<Mutex<Vec<WorkerCall>>>,
    /// Every `(thread_id, severity)` disposal reported by the orchestrator.
    pub disposals: Arc<Mutex<Vec<(String, Severity)>>>,
}

impl MockWorker {
    pub fn new(thread_id: impl Into<String>, script: Vec<MockStep>, outcome: MockOutcome) -> Self {
        Self {
            thread_id: thread_id.into(),
            script,
            outcome,
            calls: Arc::new(Mutex::new(Vec::new())),
            disposals: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start, complete with `state`, and return it.
    pub fn completing(thread_id: impl Into<String>, state: Value) -> Self {
        Self::new(
            thread_id,
            vec![MockStep::Start, MockStep::Complete(state.clone())],
            MockOutcome::Return(state),
        )
    }

    /// Start, then fail with `error`.
    pub fn failing(thread_id: impl Into<String>, error: RunError) -> Self {
        Self::new(thread_id, vec![MockStep::Start], MockOutcome::Fail(error))
    }

    /// Start, then never finish.
    pub fn hanging(thread_id: impl Into<String>) -> Self {
        Self::new(thread_id, vec![MockStep::Start], MockOutcome::Hang)
    }

    /// Number of times this worker has been called.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn disposals(&self) -> Vec<(String, Severity)> {
        self.disposals.lock().unwrap().clone()
    }

    fn event_for(&self, workflow_id: &str, step: &MockStep) -> Option<WorkerEvent> {
        let workflow_id = workflow_id.to_owned();
        let thread_id = self.thread_id.clone();
        let event = match step {
            MockStep::Start => WorkerEvent::WorkflowStart { workflow_id, thread_id },
            MockStep::JobStart(job_id) => WorkerEvent::JobStart {
                workflow_id,
                thread_id,
                job_id: job_id.clone(),
            },
            MockStep::JobComplete(job_id, state) => WorkerEvent::JobComplete {
                workflow_id,
                thread_id,
                job_id: job_id.clone(),
                state: state.clone(),
                duration: 1,
            },
            MockStep::Log(message) => WorkerEvent::Log {
                workflow_id,
                thread_id,
                message: message.clone(),
            },
            MockStep::Complete(state) => WorkerEvent::WorkflowComplete {
                workflow_id,
                thread_id,
                state: state.clone(),
            },
            MockStep::Pause(_) => return None,
        };
        Some(event)
    }
}

#[async_trait]
impl WorkerPool for MockWorker {
    async fn call_worker(&self, call: WorkerCall, events: EventSender) -> anyhow::Result<Value> {
        self.calls.lock().unwrap().push(call.clone());

        for step in &self.script {
            if let MockStep::Pause(delay) = step {
                tokio::time::sleep(*delay).await;
                continue;
            }
            if let Some(event) = self.event_for(&call.workflow_id, step) {
                // The orchestrator may have stopped listening; that is fine.
                let _ = events.send(event);
            }
        }

        match &self.outcome {
            MockOutcome::Return(value) => Ok(value.clone()),
            MockOutcome::Fail(error) => Err(error.clone().into()),
            MockOutcome::Throw(message) => Err(anyhow::anyhow!(message.clone())),
            MockOutcome::Hang => std::future::pending().await,
        }
    }

    async fn dispose(&self, thread_id: &str, severity: Severity) {
        self.disposals
            .lock()
            .unwrap()
            .push((thread_id.to_owned(), severity));
    }
}

/// Compiler that echoes the expression back, failing for selected step ids.
#[derive(Debug, Default)]
pub struct MockCompiler {
    pub failing_steps: HashSet<String>,
    pub compiled: Arc<Mutex<Vec<String>>>,
}

impl MockCompiler {
    pub fn failing_on(step_id: impl Into<String>) -> Self {
        Self {
            failing_steps: HashSet::from([step_id.into()]),
            ..Self::default()
        }
    }

    pub fn compiled(&self) -> Vec<String> {
        self.compiled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Compiler for MockCompiler {
    async fn compile(&self, step_id: &str, expression: &str) -> anyhow::Result<String> {
        if self.failing_steps.contains(step_id) {
            anyhow::bail!("unexpected token in expression");
        }
        self.compiled.lock().unwrap().push(step_id.to_owned());
        Ok(expression.to_owned())
    }
}

/// Installer that resolves every specifier under `/adaptors`, failing for
/// selected specifiers.
#[derive(Debug, Default)]
pub struct MockInstaller {
    pub failing_specifiers: HashSet<String>,
    pub installed: Arc<Mutex<Vec<String>>>,
}

impl MockInstaller {
    pub fn failing_on(specifier: impl Into<String>) -> Self {
        Self {
            failing_specifiers: HashSet::from([specifier.into()]),
            ..Self::default()
        }
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Autoinstaller for MockInstaller {
    async fn install(&self, specifier: &str) -> anyhow::Result<PathBuf> {
        if self.failing_specifiers.contains(specifier) {
            anyhow::bail!("package {specifier} not found in registry");
        }
        self.installed.lock().unwrap().push(specifier.to_owned());
        Ok(PathBuf::from("/adaptors").join(specifier))
    }
}
