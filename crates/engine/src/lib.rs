//! `engine` crate: plan models, plan validation, and workflow orchestration.
//!
//! A raw JSON plan goes through [`validate`] (schema, then the structural
//! checks over the dependency model built in [`dag`]). An accepted plan gets an
//! [`ExecutionContext`], and the [`Orchestrator`] hands it to a worker while the
//! [`lifecycle`] handlers turn worker events into [`WorkflowEvent`]s.

pub mod context;
pub mod dag;
pub mod error;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod models;
pub mod schema;
pub mod validate;

pub use context::{ExecutionContext, WorkflowState, WorkflowStatus};
pub use dag::{build_model, DependencyModel};
pub use error::{EngineError, LifecycleError, SchemaViolation, ValidationError};
pub use events::{EventBus, WorkflowEvent};
pub use executor::{ExecutorConfig, Orchestrator};
pub use models::{
    EdgeCondition, ExecutionPlan, Next, PlanOptions, SanitizePolicy, Step, WorkflowSpec,
};
pub use validate::{inspect, load_plan, validate, PlanValidation, ValidatedPlan};

#[cfg(test)]
mod executor_tests;
