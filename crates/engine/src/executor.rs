//! Workflow dispatch.
//!
//! `Orchestrator` is the central coordinator:
//! 1. Validates the plan and builds an `ExecutionContext` for the run.
//! 2. Resolves adaptors and compiles every step before any worker is used.
//! 3. Calls the worker pool and feeds its events through the lifecycle
//!    handlers until the workflow completes, the call resolves, the time
//!    budget runs out or the run is cancelled.
//! 4. Folds any failure into a `RunError` and reports the unit's health to the
//!    pool according to its severity.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, instrument, warn};
use uuid::Uuid;
use worker::{
    event_channel, Autoinstaller, Compiler, EventReceiver, RunError, Severity, TimeoutCause,
    WorkerCall, WorkerPool,
};

use crate::context::{ExecutionContext, WorkflowState, WorkflowStatus};
use crate::events::{EventBus, WorkflowEvent, DEFAULT_EVENT_CAPACITY};
use crate::lifecycle;
use crate::models::ExecutionPlan;
use crate::validate::load_plan;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Run budget in milliseconds when the plan sets no `options.timeout`.
    /// `0` disables the limit.
    pub default_timeout_ms: u64,
    /// Buffer size of the outward event bus.
    pub event_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5 * 60 * 1000,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs workflows on a worker pool.
///
/// Runs are independent: each gets its own `ExecutionContext`, and the only
/// thing they share is the pool and the outward event bus.
pub struct Orchestrator {
    worker: Arc<dyn WorkerPool>,
    compiler: Arc<dyn Compiler>,
    installer: Arc<dyn Autoinstaller>,
    config: ExecutorConfig,
    events: EventBus,
}

impl Orchestrator {
    pub fn new(
        worker: Arc<dyn WorkerPool>,
        compiler: Arc<dyn Compiler>,
        installer: Arc<dyn Autoinstaller>,
        config: ExecutorConfig,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            worker,
            compiler,
            installer,
            config,
            events,
        }
    }

    /// Receive the events of every run started from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Run a plan to completion and return its final state.
    ///
    /// # Errors
    /// `EngineError::Validation` if the plan is not executable (no worker is
    /// touched), `EngineError::Run` if preparation or execution failed.
    pub async fn execute(&self, plan: &Value, input: Value) -> Result<WorkflowState, EngineError> {
        self.execute_with_cancel(plan, input, CancellationToken::new())
            .await
    }

    /// Like [`Orchestrator::execute`], but the run is abandoned as soon as
    /// `cancel` fires.
    #[instrument(skip_all)]
    pub async fn execute_with_cancel(
        &self,
        plan: &Value,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<WorkflowState, EngineError> {
        // ------------------------------------------------------------------
        // Validate before anything else is touched.
        // ------------------------------------------------------------------
        let validated = load_plan(plan)?;
        for warning in &validated.warnings {
            warn!("{warning}");
        }
        let plan = validated.plan;

        let workflow_id = plan
            .workflow
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut ctx = ExecutionContext::new(
            WorkflowState::new(workflow_id.clone()),
            info_span!("workflow", workflow_id = %workflow_id),
            Arc::clone(&self.worker),
            plan.options.clone(),
        )
        .with_events(self.events.clone());

        info!(
            workflow_id = %workflow_id,
            steps = plan.steps().len(),
            "plan accepted"
        );

        // ------------------------------------------------------------------
        // Prepare, then dispatch.
        // ------------------------------------------------------------------
        let outcome = match self.prepare(plan).await {
            Ok(prepared) => self.dispatch(&mut ctx, prepared, input, &cancel).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                info!(workflow_id = %workflow_id, duration = ctx.state().duration, "run succeeded");
                Ok(ctx.into_state())
            }
            Err(err) => {
                self.fail(&mut ctx, &err).await;
                Err(EngineError::Run(err))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal: resolve adaptors and compile every step.
    // -----------------------------------------------------------------------

    async fn prepare(&self, mut plan: ExecutionPlan) -> Result<ExecutionPlan, RunError> {
        for (index, step) in plan.workflow.steps.iter_mut().enumerate() {
            if let Some(adaptor) = step.adaptor.as_deref().filter(|a| !a.is_empty()) {
                let path = self.installer.install(adaptor).await.map_err(|e| {
                    RunError::Autoinstall {
                        specifier: adaptor.to_owned(),
                        message: format!("{e:#}"),
                    }
                })?;
                step.linker = Some(json!({ adaptor: { "path": path.display().to_string() } }));
            }

            if let Some(expression) = &step.expression {
                let label = step.label(index);
                let compiled = self
                    .compiler
                    .compile(&label, expression)
                    .await
                    .map_err(|e| RunError::Compile {
                        step_id: label.clone(),
                        message: format!("{e:#}"),
                    })?;
                step.expression = Some(compiled);
            }
        }
        Ok(plan)
    }

    // -----------------------------------------------------------------------
    // Internal: hand the plan to a worker and follow its events.
    // -----------------------------------------------------------------------

    async fn dispatch(
        &self,
        ctx: &mut ExecutionContext,
        plan: ExecutionPlan,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let timeout_ms = plan.options.timeout.unwrap_or(self.config.default_timeout_ms);
        let call = WorkerCall::run(
            ctx.workflow_id(),
            to_json(&plan)?,
            input,
            to_json(&plan.options)?,
        );

        let (tx, mut rx) = event_channel();
        let worker = Arc::clone(ctx.worker());
        let pending = worker.call_worker(call, tx);
        tokio::pin!(pending);
        let deadline = async move {
            if timeout_ms == 0 {
                std::future::pending::<()>().await;
            } else {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            }
        };
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => {
                    route(ctx, event);
                    if ctx.state().status == WorkflowStatus::Done {
                        // Completion was reported; the call's fate no longer decides the run.
                        return Ok(());
                    }
                }
                result = &mut pending => {
                    // Events sent just before the call resolved.
                    drain(ctx, &mut rx);
                    break result;
                }
                _ = &mut deadline => {
                    break Err(RunError::Timeout(TimeoutCause::Elapsed(timeout_ms)).into());
                }
                _ = cancel.cancelled() => {
                    break Err(RunError::Timeout(TimeoutCause::Cancelled).into());
                }
            }
        };

        match outcome {
            Ok(result) => settle(ctx, result),
            Err(err) if ctx.state().status == WorkflowStatus::Done => {
                let err = RunError::classify(err);
                warn!(
                    parent: ctx.logger(),
                    error_type = %err.kind(),
                    "worker failed after reporting completion: {err}"
                );
                self.release(ctx, err.severity()).await;
                Ok(())
            }
            Err(err) => Err(RunError::classify(err)),
        }
    }

    // -----------------------------------------------------------------------
    // Internal: record a failure and tell the pool about the worker.
    // -----------------------------------------------------------------------

    async fn fail(&self, ctx: &mut ExecutionContext, err: &RunError) {
        let severity = err.severity();
        error!(
            workflow_id = %ctx.workflow_id(),
            error_type = %err.kind(),
            %severity,
            "run failed: {err}"
        );

        self.release(ctx, severity).await;
        lifecycle::workflow_error(ctx, err);
    }

    /// Report the run's worker unit to the pool unless it stays reusable.
    async fn release(&self, ctx: &ExecutionContext, severity: Severity) {
        if severity.worker_reusable() {
            return;
        }
        if let Some(thread_id) = ctx.state().thread_id.as_deref() {
            self.worker.dispose(thread_id, severity).await;
        }
    }
}

fn route(ctx: &mut ExecutionContext, event: worker::WorkerEvent) {
    let name = event.name();
    if let Err(err) = lifecycle::handle(ctx, event) {
        warn!(parent: ctx.logger(), event = name, "ignoring worker event: {err}");
    }
}

fn drain(ctx: &mut ExecutionContext, rx: &mut EventReceiver) {
    while let Ok(event) = rx.try_recv() {
        route(ctx, event);
    }
}

/// Finish a run whose worker call resolved successfully.
fn settle(ctx: &mut ExecutionContext, result: Value) -> Result<(), RunError> {
    match ctx.state().status {
        WorkflowStatus::Done => Ok(()),
        WorkflowStatus::Running => {
            // No explicit complete event; the call's value is the final state.
            let thread_id = ctx.state().thread_id.clone().unwrap_or_default();
            lifecycle::workflow_complete(ctx, thread_id, result)
                .map_err(|e| RunError::Execution(e.to_string()))
        }
        WorkflowStatus::Pending => Err(RunError::Execution(
            "worker resolved without starting the workflow".to_owned(),
        )),
        WorkflowStatus::Error => Err(RunError::Execution(
            "workflow already failed".to_owned(),
        )),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, RunError> {
    serde_json::to_value(value).map_err(|e| RunError::Execution(e.to_string()))
}
