//! Engine-level error types.

use std::fmt;

use thiserror::Error;
use worker::RunError;

/// One schema problem, located by a dotted path into the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Every schema problem found in a plan, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolations(pub Vec<SchemaViolation>);

impl fmt::Display for SchemaViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

/// Reasons a plan is not executable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Fields with the wrong type or shape.
    #[error("{0}")]
    Schema(SchemaViolations),

    /// A `next` edge points at a step that doesn't exist.
    #[error("Cannot find job: {0}")]
    UnknownStep(String),

    /// `options.start` names a step that doesn't exist.
    #[error("Could not find start job: {0}")]
    MissingStart(String),

    /// A step can reach itself by following `next` edges.
    #[error("Circular dependency: {origin} <-> {reached}")]
    CircularDependency { origin: String, reached: String },

    /// A step has more than one upstream step.
    #[error("Multiple dependencies detected for: {0}")]
    MultipleDependencies(String),

    #[error("Invalid key '{key}' found in step with id '{step}'.")]
    InvalidStepKey { key: String, step: String },

    #[error("Step with adaptor '{adaptor}' must have an expression. Step id: '{step}'.")]
    AdaptorWithoutExpression { adaptor: String, step: String },

    #[error("Duplicate step ID detected: {0}")]
    DuplicateStepId(String),
}

/// A worker event that could not be applied to an execution context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("workflow '{0}' is already running")]
    AlreadyRunning(String),

    #[error("workflow '{0}' completed before it started")]
    NotStarted(String),

    #[error("event for workflow '{got}' delivered to workflow '{expected}'")]
    ForeignEvent { expected: String, got: String },
}

/// Errors produced by the orchestrator (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid plan: {0}")]
    Validation(#[from] ValidationError),

    /// The run failed; the severity of the inner error decided the worker's fate.
    #[error("run failed ({kind}): {0}", kind = .0.kind())]
    Run(#[from] RunError),
}
