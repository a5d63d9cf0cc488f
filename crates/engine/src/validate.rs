//! Plan validation. Run this before any worker resource is touched.
//!
//! Order of checks:
//! 1. Schema conformance (every violation at once; short-circuits the rest).
//! 2. Dependency model construction (unknown `next` targets).
//! 3. `options.start` names a declared step.
//! 4. No cycles.
//! 5. No step with more than one upstream step.
//! 6. Step keys are recognised.
//! 7. A step with an adaptor has an expression.
//! 8. Step ids are unique.
//! 9. Warnings: unreferenced steps, unrecognised options.
//!
//! The first failing check aborts. Warnings never do.

use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use crate::dag::{assert_acyclic, assert_single_inputs, build_model};
use crate::error::{SchemaViolation, SchemaViolations, ValidationError};
use crate::models::{ExecutionPlan, OPTION_KEYS, STEP_KEYS};
use crate::schema::check_schema;

/// Structured result of validating a plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanValidation {
    pub fatal: Option<ValidationError>,
    pub warnings: Vec<String>,
}

impl PlanValidation {
    pub fn is_valid(&self) -> bool {
        self.fatal.is_none()
    }
}

/// A plan that passed validation, with whatever it warned about.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    pub plan: ExecutionPlan,
    pub warnings: Vec<String>,
}

/// Validate `raw`, logging any warnings.
///
/// # Errors
/// The first [`ValidationError`] found.
pub fn validate(raw: &Value) -> Result<bool, ValidationError> {
    let validated = load_plan(raw)?;
    for warning in &validated.warnings {
        warn!("{warning}");
    }
    Ok(true)
}

/// Validate `raw` without logging, returning the fatal error and warnings
/// side by side.
pub fn inspect(raw: &Value) -> PlanValidation {
    let mut warnings = Vec::new();
    let fatal = run_checks(raw, &mut warnings).err();
    PlanValidation { fatal, warnings }
}

/// Validate `raw` and return the typed plan.
///
/// # Errors
/// The first [`ValidationError`] found.
pub fn load_plan(raw: &Value) -> Result<ValidatedPlan, ValidationError> {
    let mut warnings = Vec::new();
    let plan = run_checks(raw, &mut warnings)?;
    Ok(ValidatedPlan { plan, warnings })
}

fn run_checks(raw: &Value, warnings: &mut Vec<String>) -> Result<ExecutionPlan, ValidationError> {
    let violations = check_schema(raw);
    if !violations.is_empty() {
        return Err(ValidationError::Schema(SchemaViolations(violations)));
    }
    let plan: ExecutionPlan = serde_json::from_value(raw.clone()).map_err(|e| {
        ValidationError::Schema(SchemaViolations(vec![SchemaViolation::new(
            "plan",
            e.to_string(),
        )]))
    })?;

    let model = build_model(plan.steps(), warnings)?;

    if let Some(start) = &plan.options.start {
        if !plan.steps().iter().any(|s| s.id.as_ref() == Some(start)) {
            return Err(ValidationError::MissingStart(start.clone()));
        }
    }

    assert_acyclic(&model)?;
    assert_single_inputs(&model)?;
    assert_step_keys(raw)?;
    assert_adaptors_have_expressions(&plan)?;
    assert_unique_ids(&plan)?;

    if plan.steps().len() > 1 {
        for id in model.unreferenced() {
            warnings.push(format!("Step '{id}' is not referenced by any other step"));
        }
    }
    warn_unrecognised_options(raw, warnings);

    Ok(plan)
}

fn raw_steps(raw: &Value) -> impl Iterator<Item = &serde_json::Map<String, Value>> {
    raw.pointer("/workflow/steps")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn assert_step_keys(raw: &Value) -> Result<(), ValidationError> {
    for (index, step) in raw_steps(raw).enumerate() {
        if let Some(key) = step.keys().find(|key| !STEP_KEYS.contains(&key.as_str())) {
            let label = step
                .get("id")
                .and_then(Value::as_str)
                .map_or_else(|| index.to_string(), str::to_owned);
            return Err(ValidationError::InvalidStepKey {
                key: key.clone(),
                step: label,
            });
        }
    }
    Ok(())
}

fn assert_adaptors_have_expressions(plan: &ExecutionPlan) -> Result<(), ValidationError> {
    for (index, step) in plan.steps().iter().enumerate() {
        if let Some(adaptor) = step.adaptor.as_deref().filter(|a| !a.is_empty()) {
            if step.expression.is_none() {
                return Err(ValidationError::AdaptorWithoutExpression {
                    adaptor: adaptor.to_owned(),
                    step: step.label(index),
                });
            }
        }
    }
    Ok(())
}

fn assert_unique_ids(plan: &ExecutionPlan) -> Result<(), ValidationError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for id in plan.steps().iter().filter_map(|s| s.id.as_deref()) {
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateStepId(id.to_owned()));
        }
    }
    Ok(())
}

fn warn_unrecognised_options(raw: &Value, warnings: &mut Vec<String>) {
    let Some(options) = raw.get("options").and_then(Value::as_object) else {
        return;
    };
    for key in options.keys().filter(|key| !OPTION_KEYS.contains(&key.as_str())) {
        warnings.push(format!("Unrecognized option '{key}' in options object"));
    }
}
