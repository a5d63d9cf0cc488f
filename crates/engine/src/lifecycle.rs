//! Lifecycle handlers: worker events in, state changes and outward events out.
//!
//! `pending → running → {done | error}`. Each handler mutates the context it
//! is given and publishes at most one [`WorkflowEvent`]. Once the context is
//! terminal every further worker event is dropped.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use worker::{LogMessage, RunError, WorkerEvent};

use crate::context::{ExecutionContext, FailureRecord, WorkflowStatus, DURATION_UNSET};
use crate::error::LifecycleError;
use crate::events::WorkflowEvent;

/// Route a worker event to its handler.
///
/// # Errors
/// [`LifecycleError`] if the event belongs to another workflow or is not
/// valid in the current state. The context is left unchanged.
pub fn handle(ctx: &mut ExecutionContext, event: WorkerEvent) -> Result<(), LifecycleError> {
    if event.workflow_id() != ctx.workflow_id() {
        return Err(LifecycleError::ForeignEvent {
            expected: ctx.workflow_id().to_owned(),
            got: event.workflow_id().to_owned(),
        });
    }
    if ctx.state().status.is_terminal() {
        debug!(
            parent: ctx.logger(),
            event = event.name(),
            status = %ctx.state().status,
            "dropping event for finished workflow"
        );
        return Ok(());
    }

    match event {
        WorkerEvent::WorkflowStart { thread_id, .. } => workflow_start(ctx, thread_id),
        WorkerEvent::JobStart { thread_id, job_id, .. } => {
            job_start(ctx, thread_id, job_id);
            Ok(())
        }
        WorkerEvent::JobComplete {
            thread_id,
            job_id,
            state,
            duration,
            ..
        } => {
            job_complete(ctx, thread_id, job_id, state, duration);
            Ok(())
        }
        WorkerEvent::Log { thread_id, message, .. } => {
            log(ctx, thread_id, message);
            Ok(())
        }
        WorkerEvent::WorkflowComplete { thread_id, state, .. } => {
            workflow_complete(ctx, thread_id, state)
        }
    }
}

/// Mark the run as started on `thread_id`.
///
/// A second start while running is rejected rather than resetting timing.
pub fn workflow_start(ctx: &mut ExecutionContext, thread_id: String) -> Result<(), LifecycleError> {
    if ctx.state().status == WorkflowStatus::Running {
        return Err(LifecycleError::AlreadyRunning(ctx.workflow_id().to_owned()));
    }

    let workflow_id = ctx.workflow_id().to_owned();
    let state = ctx.state_mut();
    state.status = WorkflowStatus::Running;
    state.start_time = Some(Utc::now());
    state.duration = DURATION_UNSET;
    state.thread_id = Some(thread_id.clone());

    info!(parent: ctx.logger(), %thread_id, "workflow started");
    ctx.emit(WorkflowEvent::WorkflowStart { workflow_id, thread_id });
    Ok(())
}

pub fn job_start(ctx: &mut ExecutionContext, thread_id: String, job_id: String) {
    debug!(parent: ctx.logger(), %job_id, "job started");
    ctx.emit(WorkflowEvent::JobStart {
        workflow_id: ctx.workflow_id().to_owned(),
        thread_id,
        job_id,
    });
}

pub fn job_complete(
    ctx: &mut ExecutionContext,
    thread_id: String,
    job_id: String,
    state: Value,
    duration: i64,
) {
    debug!(parent: ctx.logger(), %job_id, duration, "job complete");
    ctx.emit(WorkflowEvent::JobComplete {
        workflow_id: ctx.workflow_id().to_owned(),
        thread_id,
        job_id,
        state,
        duration,
    });
}

/// Forward a worker log line, flattened alongside the run's ids.
pub fn log(ctx: &mut ExecutionContext, thread_id: String, message: LogMessage) {
    let LogMessage {
        level,
        name,
        message,
        time,
    } = message;
    ctx.emit(WorkflowEvent::WorkflowLog {
        workflow_id: ctx.workflow_id().to_owned(),
        thread_id,
        level,
        name,
        message,
        time,
    });
}

/// Mark the run as done with `result`.
///
/// # Errors
/// [`LifecycleError::NotStarted`] if no start was recorded.
pub fn workflow_complete(
    ctx: &mut ExecutionContext,
    thread_id: String,
    result: Value,
) -> Result<(), LifecycleError> {
    let Some(start_time) = ctx.state().start_time else {
        return Err(LifecycleError::NotStarted(ctx.workflow_id().to_owned()));
    };

    let duration = elapsed_ms(start_time);
    let workflow_id = ctx.workflow_id().to_owned();
    let state = ctx.state_mut();
    state.status = WorkflowStatus::Done;
    state.duration = duration;
    state.result = Some(result.clone());

    info!(parent: ctx.logger(), duration, "workflow complete");
    ctx.emit(WorkflowEvent::WorkflowComplete {
        workflow_id,
        state: result,
        duration,
        thread_id,
    });
    Ok(())
}

/// Mark the run as failed.
///
/// Unlike the worker-driven handlers this is called by the orchestrator, so
/// it also applies to runs that never started. A terminal context is left
/// untouched.
pub fn workflow_error(ctx: &mut ExecutionContext, error: &RunError) {
    if ctx.state().status.is_terminal() {
        warn!(parent: ctx.logger(), %error, "error reported for finished workflow");
        return;
    }

    let record = FailureRecord {
        error_type: error.kind(),
        severity: error.severity(),
        message: error.to_string(),
    };
    let state = ctx.state_mut();
    state.status = WorkflowStatus::Error;
    if let Some(start_time) = state.start_time {
        state.duration = elapsed_ms(start_time);
    }
    state.error = Some(record.clone());
    let thread_id = state.thread_id.clone();

    warn!(
        parent: ctx.logger(),
        error_type = %record.error_type,
        severity = %record.severity,
        "workflow failed: {}",
        record.message
    );
    ctx.emit(WorkflowEvent::WorkflowError {
        workflow_id: ctx.workflow_id().to_owned(),
        thread_id,
        error_type: record.error_type,
        severity: record.severity,
        message: record.message,
    });
}

/// Milliseconds since `start_time`, never below 1 for a finished run.
fn elapsed_ms(start_time: DateTime<Utc>) -> i64 {
    (Utc::now() - start_time).num_milliseconds().max(1)
}
