//! Run failure taxonomy.
//!
//! Every failure surfaced while preparing or running a workflow is folded into
//! a [`RunError`]. Each variant carries a fixed [`Severity`] which is the only
//! signal the dispatcher uses to decide what happens to the worker unit:
//! - `Kill`: destroy the unit immediately, its state is untrustworthy.
//! - `Crash`: the unit is unusable and must not be reused.
//! - `Exception`: the unit stays in the pool for later runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// How badly a failure damaged the worker unit that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Kill,
    Crash,
    Exception,
}

impl Severity {
    /// Whether the unit may serve another run after this failure.
    pub fn worker_reusable(self) -> bool {
        matches!(self, Self::Exception)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kill => write!(f, "kill"),
            Self::Crash => write!(f, "crash"),
            Self::Exception => write!(f, "exception"),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable names for each failure class, as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    TimeoutError,
    #[serde(rename = "OOMError")]
    OomError,
    ExitError,
    CompileError,
    AutoinstallError,
    ExecutionError,
}

impl ErrorKind {
    /// The fixed severity attached to this kind.
    pub fn severity(self) -> Severity {
        match self {
            Self::TimeoutError | Self::OomError => Severity::Kill,
            Self::ExitError | Self::CompileError => Severity::Crash,
            Self::AutoinstallError | Self::ExecutionError => Severity::Exception,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TimeoutError => "TimeoutError",
            Self::OomError => "OOMError",
            Self::ExitError => "ExitError",
            Self::CompileError => "CompileError",
            Self::AutoinstallError => "AutoinstallError",
            Self::ExecutionError => "ExecutionError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RunError
// ---------------------------------------------------------------------------

/// Why a run stopped before its time budget was spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutCause {
    /// The configured budget (in milliseconds) elapsed.
    Elapsed(u64),
    /// An explicit cancellation request arrived.
    Cancelled,
}

/// A classified run failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunError {
    #[error("{0}")]
    Timeout(TimeoutCause),

    /// The worker exceeded its memory budget.
    #[error("run exceeded memory limit")]
    Oom,

    /// The worker unit exited underneath the run.
    #[error("worker process exited with code {code}")]
    Exit { code: i32 },

    /// A step's expression could not be compiled.
    #[error("failed to compile step '{step_id}': {message}")]
    Compile { step_id: String, message: String },

    /// An adaptor could not be resolved or installed.
    #[error("failed to install adaptor '{specifier}': {message}")]
    Autoinstall { specifier: String, message: String },

    /// Anything else thrown while the job was executing.
    #[error("{0}")]
    Execution(String),
}

impl fmt::Display for TimeoutCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elapsed(ms) => write!(f, "workflow did not complete within {ms}ms"),
            Self::Cancelled => write!(f, "workflow was cancelled"),
        }
    }
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::TimeoutError,
            Self::Oom => ErrorKind::OomError,
            Self::Exit { .. } => ErrorKind::ExitError,
            Self::Compile { .. } => ErrorKind::CompileError,
            Self::Autoinstall { .. } => ErrorKind::AutoinstallError,
            Self::Execution(_) => ErrorKind::ExecutionError,
        }
    }

    pub fn severity(&self) -> Severity {
        self.kind().severity()
    }

    /// Normalise an arbitrary failure into the taxonomy.
    ///
    /// A `RunError` somewhere in the chain keeps its own kind; anything else
    /// is an `ExecutionError` carrying the full error chain as its message.
    pub fn classify(error: anyhow::Error) -> Self {
        match error.downcast::<RunError>() {
            Ok(run_error) => run_error,
            Err(other) => {
                if let Some(run_error) = other.chain().find_map(|e| e.downcast_ref::<RunError>()) {
                    return run_error.clone();
                }
                debug!(
                    error = %other,
                    "unclassified worker failure, treating as ExecutionError"
                );
                Self::Execution(format!("{other:#}"))
            }
        }
    }
}
