//! End-to-end tests for the orchestrator.
//!
//! These use `MockWorker`, `MockCompiler` and `MockInstaller` so no real worker
//! pool is required. Every test drives a full `Orchestrator::execute` call and
//! checks the final state, the outward events, and what the pool was told.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use worker::mock::{MockCompiler, MockInstaller, MockOutcome, MockStep, MockWorker};
use worker::{ErrorKind, LogMessage, RunError, Severity, TimeoutCause, RUN_OPERATION};

use crate::{EngineError, ExecutorConfig, Orchestrator, WorkflowEvent, WorkflowStatus};

struct Harness {
    orchestrator: Orchestrator,
    worker: Arc<MockWorker>,
    compiler: Arc<MockCompiler>,
    installer: Arc<MockInstaller>,
}

fn harness_with(worker: MockWorker, compiler: MockCompiler, installer: MockInstaller) -> Harness {
    let worker = Arc::new(worker);
    let compiler = Arc::new(compiler);
    let installer = Arc::new(installer);
    let orchestrator = Orchestrator::new(
        worker.clone(),
        compiler.clone(),
        installer.clone(),
        ExecutorConfig::default(),
    );
    Harness {
        orchestrator,
        worker,
        compiler,
        installer,
    }
}

fn harness(worker: MockWorker) -> Harness {
    harness_with(worker, MockCompiler::default(), MockInstaller::default())
}

/// a → b, both with adaptors.
fn two_step_plan(options: Value) -> Value {
    json!({
        "options": options,
        "workflow": {
            "id": "wf-1",
            "steps": [
                { "id": "a", "adaptor": "http", "expression": "get('/')", "next": { "b": true } },
                { "id": "b", "adaptor": "common", "expression": "fn(s => s)" }
            ]
        }
    })
}

fn collect(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn log_line(text: &str) -> LogMessage {
    LogMessage {
        level: "info".into(),
        name: "job".into(),
        message: vec![json!(text)],
        time: 1,
    }
}

// ============================================================
// Successful runs
// ============================================================

#[tokio::test]
async fn successful_run_reports_start_logs_and_completion_in_order() {
    let h = harness(MockWorker::new(
        "t-1",
        vec![
            MockStep::Start,
            MockStep::JobStart("a".into()),
            MockStep::Log(log_line("oh hai")),
            MockStep::JobComplete("a".into(), json!({ "a": 1 })),
            MockStep::Pause(Duration::from_millis(15)),
            MockStep::Complete(json!({ "a": 777 })),
        ],
        MockOutcome::Return(json!({ "a": 777 })),
    ));
    let mut rx = h.orchestrator.subscribe();

    let state = h
        .orchestrator
        .execute(&two_step_plan(json!({})), json!({ "data": {} }))
        .await
        .expect("run should succeed");

    assert_eq!(state.id, "wf-1");
    assert_eq!(state.status, WorkflowStatus::Done);
    assert_eq!(state.result, Some(json!({ "a": 777 })));
    assert_eq!(state.thread_id.as_deref(), Some("t-1"));
    assert!(state.duration > 0);

    let names: Vec<_> = collect(&mut rx).iter().map(WorkflowEvent::name).collect();
    assert_eq!(
        names,
        vec![
            "workflow-start",
            "job-start",
            "workflow-log",
            "job-complete",
            "workflow-complete"
        ]
    );
    assert!(h.worker.disposals().is_empty());
}

#[tokio::test]
async fn worker_receives_compiled_and_linked_plan() {
    let h = harness(MockWorker::completing("t-1", json!({})));

    h.orchestrator
        .execute(&two_step_plan(json!({ "stepTimeout": 100 })), json!({ "x": 1 }))
        .await
        .unwrap();

    assert_eq!(h.installer.installed(), vec!["http", "common"]);
    assert_eq!(h.compiler.compiled(), vec!["a", "b"]);

    let calls = h.worker.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.operation, RUN_OPERATION);
    assert_eq!(call.workflow_id, "wf-1");

    let plan = &call.args[0];
    assert_eq!(plan["workflow"]["steps"][0]["linker"]["http"]["path"], "/adaptors/http");
    assert_eq!(call.args[1], json!({ "x": 1 }));
    assert_eq!(call.args[2], json!({ "stepTimeout": 100 }));
}

#[tokio::test]
async fn call_result_completes_a_run_without_complete_event() {
    let h = harness(MockWorker::new(
        "t-1",
        vec![MockStep::Start],
        MockOutcome::Return(json!({ "implicit": true })),
    ));

    let state = h
        .orchestrator
        .execute(&two_step_plan(json!({})), json!({}))
        .await
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Done);
    assert_eq!(state.result, Some(json!({ "implicit": true })));
}

#[tokio::test]
async fn anonymous_workflow_gets_a_generated_id() {
    let h = harness(MockWorker::completing("t-1", json!({})));
    let plan = json!({ "workflow": { "steps": [{ "expression": "fn()" }] } });

    let state = h.orchestrator.execute(&plan, json!({})).await.unwrap();

    assert!(!state.id.is_empty());
    assert_eq!(h.worker.calls.lock().unwrap()[0].workflow_id, state.id);
}

#[tokio::test]
async fn zero_timeout_disables_the_limit() {
    let worker = MockWorker::new(
        "t-1",
        vec![
            MockStep::Start,
            MockStep::Pause(Duration::from_millis(30)),
            MockStep::Complete(json!({})),
        ],
        MockOutcome::Return(json!({})),
    );
    let worker = Arc::new(worker);
    let orchestrator = Orchestrator::new(
        worker.clone(),
        Arc::new(MockCompiler::default()),
        Arc::new(MockInstaller::default()),
        ExecutorConfig {
            default_timeout_ms: 1,
            ..ExecutorConfig::default()
        },
    );

    let state = orchestrator
        .execute(&two_step_plan(json!({ "timeout": 0 })), json!({}))
        .await
        .unwrap();
    assert_eq!(state.status, WorkflowStatus::Done);
}

// ============================================================
// Failures before dispatch
// ============================================================

#[tokio::test]
async fn invalid_plan_never_reaches_the_worker() {
    let h = harness(MockWorker::completing("t-1", json!({})));
    let plan = json!({ "workflow": { "steps": [
        { "id": "a", "next": { "b": true } },
        { "id": "b", "next": { "a": true } }
    ] } });

    let err = h.orchestrator.execute(&plan, json!({})).await.unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
    assert!(err.to_string().contains("Circular dependency"));
    assert_eq!(h.worker.call_count(), 0);
}

#[tokio::test]
async fn compile_failure_aborts_before_dispatch() {
    let h = harness_with(
        MockWorker::completing("t-1", json!({})),
        MockCompiler::failing_on("b"),
        MockInstaller::default(),
    );
    let mut rx = h.orchestrator.subscribe();

    let err = h
        .orchestrator
        .execute(&two_step_plan(json!({})), json!({}))
        .await
        .unwrap_err();

    let EngineError::Run(run_error) = err else {
        panic!("expected a run error");
    };
    assert_eq!(run_error.kind(), ErrorKind::CompileError);
    assert_eq!(h.worker.call_count(), 0);
    assert!(h.worker.disposals().is_empty());

    match collect(&mut rx).as_slice() {
        [WorkflowEvent::WorkflowError {
            workflow_id,
            thread_id,
            error_type,
            severity,
            ..
        }] => {
            assert_eq!(workflow_id, "wf-1");
            assert!(thread_id.is_none());
            assert_eq!(*error_type, ErrorKind::CompileError);
            assert_eq!(*severity, Severity::Crash);
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn install_failure_aborts_before_dispatch() {
    let h = harness_with(
        MockWorker::completing("t-1", json!({})),
        MockCompiler::default(),
        MockInstaller::failing_on("common"),
    );

    let err = h
        .orchestrator
        .execute(&two_step_plan(json!({})), json!({}))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Run(RunError::Autoinstall { ref specifier, .. }) if specifier == "common"
    ));
    assert_eq!(h.worker.call_count(), 0);
}

// ============================================================
// Failures during execution
// ============================================================

#[tokio::test(start_paused = true)]
async fn timeout_kills_the_worker() {
    let h = harness(MockWorker::hanging("t-9"));
    let mut rx = h.orchestrator.subscribe();

    let err = h
        .orchestrator
        .execute(&two_step_plan(json!({ "timeout": 50 })), json!({}))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Run(RunError::Timeout(TimeoutCause::Elapsed(50)))
    ));
    assert_eq!(h.worker.disposals(), vec![("t-9".to_string(), Severity::Kill)]);

    let events = collect(&mut rx);
    assert_eq!(events.first().map(WorkflowEvent::name), Some("workflow-start"));
    assert_eq!(events.last().map(WorkflowEvent::name), Some("workflow-error"));
}

#[tokio::test]
async fn cancellation_takes_the_timeout_path() {
    let h = harness(MockWorker::hanging("t-3"));
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = h
        .orchestrator
        .execute_with_cancel(&two_step_plan(json!({})), json!({}), token)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Run(RunError::Timeout(TimeoutCause::Cancelled))
    ));
    assert_eq!(h.worker.disposals(), vec![("t-3".to_string(), Severity::Kill)]);
}

#[tokio::test]
async fn oom_kills_the_worker() {
    let h = harness(MockWorker::failing("t-1", RunError::Oom));

    let err = h
        .orchestrator
        .execute(&two_step_plan(json!({})), json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Run(RunError::Oom)));
    assert_eq!(h.worker.disposals(), vec![("t-1".to_string(), Severity::Kill)]);
}

#[tokio::test]
async fn unexpected_exit_retires_the_worker() {
    let h = harness(MockWorker::failing("t-2", RunError::Exit { code: 134 }));

    let err = h
        .orchestrator
        .execute(&two_step_plan(json!({})), json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Run(RunError::Exit { code: 134 })));
    assert_eq!(h.worker.disposals(), vec![("t-2".to_string(), Severity::Crash)]);
}

#[tokio::test]
async fn uncaught_exception_keeps_the_worker() {
    let h = harness(MockWorker::new(
        "t-1",
        vec![MockStep::Start],
        MockOutcome::Throw("TypeError: cannot read 'x' of undefined".into()),
    ));
    let mut rx = h.orchestrator.subscribe();

    let err = h
        .orchestrator
        .execute(&two_step_plan(json!({})), json!({}))
        .await
        .unwrap_err();

    let EngineError::Run(run_error) = err else {
        panic!("expected a run error");
    };
    assert_eq!(run_error.kind(), ErrorKind::ExecutionError);
    assert_eq!(run_error.severity(), Severity::Exception);
    assert!(h.worker.disposals().is_empty());

    let last = collect(&mut rx).pop().unwrap();
    assert!(matches!(
        last,
        WorkflowEvent::WorkflowError { ref message, .. } if message.contains("TypeError")
    ));
}

#[tokio::test]
async fn reported_completion_ends_the_run_even_if_the_call_hangs() {
    let h = harness(MockWorker::new(
        "t-5",
        vec![MockStep::Start, MockStep::Complete(json!({ "a": 777 }))],
        MockOutcome::Hang,
    ));
    let mut rx = h.orchestrator.subscribe();

    let state = h
        .orchestrator
        .execute(&two_step_plan(json!({ "timeout": 50 })), json!({}))
        .await
        .expect("completion should settle the run");

    assert_eq!(state.status, WorkflowStatus::Done);
    assert_eq!(state.result, Some(json!({ "a": 777 })));
    assert!(state.error.is_none());
    assert!(h.worker.disposals().is_empty());

    let names: Vec<_> = collect(&mut rx).iter().map(WorkflowEvent::name).collect();
    assert_eq!(names, vec!["workflow-start", "workflow-complete"]);
}

#[tokio::test]
async fn exit_after_completion_retires_the_worker_but_keeps_the_result() {
    let h = harness(MockWorker::new(
        "t-6",
        vec![MockStep::Start, MockStep::Complete(json!({ "a": 777 }))],
        MockOutcome::Fail(RunError::Exit { code: 1 }),
    ));
    let mut rx = h.orchestrator.subscribe();

    let state = h
        .orchestrator
        .execute(&two_step_plan(json!({})), json!({}))
        .await
        .expect("completion should settle the run");

    assert_eq!(state.status, WorkflowStatus::Done);
    assert_eq!(state.result, Some(json!({ "a": 777 })));
    assert!(state.error.is_none());
    assert_eq!(h.worker.disposals(), vec![("t-6".to_string(), Severity::Crash)]);

    let names: Vec<_> = collect(&mut rx).iter().map(WorkflowEvent::name).collect();
    assert_eq!(names, vec!["workflow-start", "workflow-complete"]);
}

#[tokio::test]
async fn worker_that_never_starts_fails_the_run() {
    let h = harness(MockWorker::new("t-1", vec![], MockOutcome::Return(json!({}))));

    let err = h
        .orchestrator
        .execute(&two_step_plan(json!({})), json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Run(RunError::Execution(_))));
}

#[tokio::test]
async fn concurrent_runs_do_not_share_state() {
    let h = harness(MockWorker::completing("t-1", json!({ "done": true })));
    let first = json!({ "workflow": { "id": "one", "steps": [{ "expression": "a" }] } });
    let second = json!({ "workflow": { "id": "two", "steps": [{ "expression": "b" }] } });

    let (a, b) = tokio::join!(
        h.orchestrator.execute(&first, json!({})),
        h.orchestrator.execute(&second, json!({}))
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.id, "one");
    assert_eq!(b.id, "two");
    assert_eq!(a.status, WorkflowStatus::Done);
    assert_eq!(b.status, WorkflowStatus::Done);
    assert_eq!(h.worker.call_count(), 2);
}
