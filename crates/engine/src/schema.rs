//! Shape checks over a raw JSON plan.
//!
//! Unlike the structural checks these never stop at the first problem: the
//! whole plan is walked and every violation is reported, so a plan can be
//! fixed in one edit. Unknown keys are not a schema concern; they are handled
//! by the structural checks and the options warning.
//!
//! `null` on an optional field is treated as absent.

use serde_json::{Map, Value};

use crate::error::SchemaViolation;
use crate::models::SanitizePolicy;

/// Minimum length of a step or workflow name.
pub const MIN_NAME_LEN: usize = 3;

/// Walk `raw` and return every schema violation found.
pub fn check_schema(raw: &Value) -> Vec<SchemaViolation> {
    let mut checker = SchemaChecker::default();
    checker.plan(raw);
    checker.violations
}

#[derive(Default)]
struct SchemaChecker {
    violations: Vec<SchemaViolation>,
}

impl SchemaChecker {
    fn report(&mut self, path: &str, message: impl Into<String>) {
        self.violations.push(SchemaViolation::new(path, message));
    }

    fn plan(&mut self, raw: &Value) {
        let Some(plan) = raw.as_object() else {
            self.report("plan", "must be an object");
            return;
        };

        match plan.get("options") {
            None | Some(Value::Null) => {}
            Some(Value::Object(options)) => self.options(options),
            Some(_) => self.report("options", "must be an object"),
        }

        match plan.get("workflow") {
            None | Some(Value::Null) => self.report("workflow", "is required"),
            Some(Value::Object(workflow)) => self.workflow(workflow),
            Some(_) => self.report("workflow", "must be an object"),
        }
    }

    fn options(&mut self, options: &Map<String, Value>) {
        for key in ["timeout", "stepTimeout"] {
            if let Some(value) = present(options, key) {
                if value.as_u64().is_none() {
                    self.report(&format!("options.{key}"), "must be a non-negative integer");
                }
            }
        }
        for key in ["start", "end"] {
            self.optional_string(options, key, &format!("options.{key}"));
        }
        if let Some(value) = present(options, "sanitize") {
            let known = value
                .as_str()
                .is_some_and(|policy| SanitizePolicy::NAMES.contains(&policy));
            if !known {
                self.report(
                    "options.sanitize",
                    format!("must be one of: {}", SanitizePolicy::NAMES.join(", ")),
                );
            }
        }
    }

    fn workflow(&mut self, workflow: &Map<String, Value>) {
        self.optional_string(workflow, "id", "workflow.id");
        self.name(workflow, "workflow.name");

        match workflow.get("steps") {
            None | Some(Value::Null) => self.report("workflow.steps", "is required"),
            Some(Value::Array(steps)) => {
                for (index, step) in steps.iter().enumerate() {
                    let path = format!("workflow.steps[{index}]");
                    match step.as_object() {
                        Some(step) => self.step(step, &path),
                        None => self.report(&path, "must be an object"),
                    }
                }
            }
            Some(_) => self.report("workflow.steps", "must be an array"),
        }
    }

    fn step(&mut self, step: &Map<String, Value>, path: &str) {
        if let Some(id) = present(step, "id") {
            match id.as_str() {
                Some("") => self.report(&format!("{path}.id"), "must not be empty"),
                Some(_) => {}
                None => self.report(&format!("{path}.id"), "must be a string"),
            }
        }
        self.name(step, &format!("{path}.name"));
        for key in ["expression", "adaptor", "previous"] {
            self.optional_string(step, key, &format!("{path}.{key}"));
        }
        if let Some(state) = present(step, "state") {
            if !state.is_object() {
                self.report(&format!("{path}.state"), "must be an object");
            }
        }
        if let Some(configuration) = present(step, "configuration") {
            if !(configuration.is_object() || configuration.is_string()) {
                self.report(
                    &format!("{path}.configuration"),
                    "must be an object or a path string",
                );
            }
        }
        match present(step, "next") {
            None | Some(Value::String(_)) => {}
            Some(Value::Object(edges)) => {
                for (target, edge) in edges {
                    self.edge(edge, &format!("{path}.next.{target}"));
                }
            }
            Some(_) => self.report(
                &format!("{path}.next"),
                "must be a step id or a map of step ids to conditions",
            ),
        }
    }

    fn edge(&mut self, edge: &Value, path: &str) {
        match edge {
            Value::Bool(_) | Value::String(_) => {}
            Value::Object(detail) => {
                self.optional_string(detail, "condition", &format!("{path}.condition"));
                self.optional_string(detail, "label", &format!("{path}.label"));
                if let Some(disabled) = present(detail, "disabled") {
                    if !disabled.is_boolean() {
                        self.report(&format!("{path}.disabled"), "must be a boolean");
                    }
                }
            }
            _ => self.report(path, "must be true, a condition string, or an edge object"),
        }
    }

    fn name(&mut self, object: &Map<String, Value>, path: &str) {
        if let Some(name) = present(object, "name") {
            match name.as_str() {
                Some(name) if name.chars().count() < MIN_NAME_LEN => {
                    self.report(path, format!("must be at least {MIN_NAME_LEN} characters"))
                }
                Some(_) => {}
                None => self.report(path, "must be a string"),
            }
        }
    }

    fn optional_string(&mut self, object: &Map<String, Value>, key: &str, path: &str) {
        if let Some(value) = present(object, key) {
            if !value.is_string() {
                self.report(path, "must be a string");
            }
        }
    }
}

fn present<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).filter(|value| !value.is_null())
}
