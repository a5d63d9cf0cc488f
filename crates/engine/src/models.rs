//! Core domain models for an execution plan.
//!
//! These types are the typed view of a plan once it has passed schema
//! checks. They serialise back to the same camelCase JSON shape the plan
//! arrived in, which is what gets handed to a worker.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Keys a step may carry.
pub const STEP_KEYS: [&str; 9] = [
    "id",
    "name",
    "next",
    "previous",
    "adaptor",
    "expression",
    "state",
    "configuration",
    "linker",
];

/// Keys recognised under `options`.
pub const OPTION_KEYS: [&str; 5] = ["timeout", "stepTimeout", "start", "end", "sanitize"];

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Guard on a mapping-form `next` edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EdgeCondition {
    /// `true` follows the edge unconditionally.
    Always(bool),
    /// A guard expression evaluated against the step's output state.
    Expression(String),
    /// Long form with an optional guard, label and disabled flag.
    Detailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        disabled: bool,
    },
}

/// Successors of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Next {
    /// A single step id followed unconditionally.
    Single(String),
    /// Target step id → guard.
    Edges(IndexMap<String, EdgeCondition>),
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single unit of work in the workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier within the plan (referenced by `next`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Next>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    /// Adaptor module specifier, e.g. `@openfn/language-http@latest`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptor: Option<String>,
    /// Job source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    /// Credential object, or a path to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
    /// Adaptor specifier → resolved module location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linker: Option<Value>,
}

impl Step {
    /// Label used in diagnostics: the id, or the position for anonymous steps.
    pub fn label(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| index.to_string())
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How sensitive values in log output are treated by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizePolicy {
    None,
    Remove,
    Summarize,
    Obfuscate,
}

impl SanitizePolicy {
    pub const NAMES: [&'static str; 4] = ["none", "remove", "summarize", "obfuscate"];
}

/// Execution options attached to a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOptions {
    /// Whole-run budget in milliseconds. `0` disables the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Per-step budget in milliseconds, enforced by the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout: Option<u64>,
    /// Step to start from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Step to stop after.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitize: Option<SanitizePolicy>,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// The workflow part of a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

/// A complete execution plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default)]
    pub options: PlanOptions,
    pub workflow: WorkflowSpec,
}

impl ExecutionPlan {
    /// Convenience constructor for testing.
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            options: PlanOptions::default(),
            workflow: WorkflowSpec {
                steps,
                ..WorkflowSpec::default()
            },
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.workflow.steps
    }
}
