//! Dependency model: the up/down adjacency every structural check runs on.
//!
//! Only mapping-form `next` produces edges. String-form `next` is checked for
//! a valid target and remembered as an implicit link, but it adds no edge, so
//! cycles and fan-in built purely from string links are not detected.
//! Edges leaving an anonymous step are dropped.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};

use crate::error::ValidationError;
use crate::models::{Next, Step};

/// Warning raised when a plan has no steps.
pub const EMPTY_STEPS_WARNING: &str = "The workflow.steps array is empty";

/// Neighbours of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyNode {
    pub up: IndexSet<String>,
    pub down: IndexSet<String>,
}

/// Step id → neighbours, in step declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyModel {
    pub nodes: IndexMap<String, DependencyNode>,
    /// Ids on either end of a string-form `next`.
    pub implicit_links: IndexSet<String>,
}

impl DependencyModel {
    pub fn get(&self, id: &str) -> Option<&DependencyNode> {
        self.nodes.get(id)
    }

    fn ensure(&mut self, id: &str) -> &mut DependencyNode {
        self.nodes.entry(id.to_owned()).or_default()
    }

    /// Ids with no edges in either direction and no implicit link.
    pub fn unreferenced(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .filter(|(id, node)| {
                node.up.is_empty() && node.down.is_empty() && !self.implicit_links.contains(*id)
            })
            .map(|(id, _)| id.as_str())
    }
}

/// Build the dependency model for `steps`.
///
/// A plan without steps yields an empty model and pushes
/// [`EMPTY_STEPS_WARNING`] onto `warnings`.
///
/// # Errors
/// [`ValidationError::UnknownStep`] if any `next` names an undeclared step.
pub fn build_model(
    steps: &[Step],
    warnings: &mut Vec<String>,
) -> Result<DependencyModel, ValidationError> {
    if steps.is_empty() {
        warnings.push(EMPTY_STEPS_WARNING.to_owned());
    }

    let declared: HashSet<&str> = steps.iter().filter_map(|s| s.id.as_deref()).collect();
    let require = |id: &str| {
        if declared.contains(id) {
            Ok(())
        } else {
            Err(ValidationError::UnknownStep(id.to_owned()))
        }
    };

    let mut model = DependencyModel::default();
    for step in steps {
        if let Some(id) = &step.id {
            model.ensure(id);
        }

        match &step.next {
            None => {}
            Some(Next::Single(target)) => {
                require(target.as_str())?;
                if let Some(id) = &step.id {
                    model.implicit_links.insert(id.clone());
                }
                model.implicit_links.insert(target.clone());
            }
            Some(Next::Edges(edges)) => {
                for target in edges.keys() {
                    require(target.as_str())?;
                    let Some(id) = &step.id else { continue };
                    model.ensure(id).down.insert(target.clone());
                    model.ensure(target).up.insert(id.clone());
                }
            }
        }
    }

    Ok(model)
}

/// Fail if any step can reach itself along `down` edges.
///
/// Searches from every node in declaration order and reports the origin with
/// the node whose edge leads back to it.
pub fn assert_acyclic(model: &DependencyModel) -> Result<(), ValidationError> {
    for origin in model.nodes.keys() {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![origin.as_str()];

        while let Some(current) = stack.pop() {
            let Some(node) = model.get(current) else { continue };
            for next in &node.down {
                if next == origin {
                    return Err(ValidationError::CircularDependency {
                        origin: origin.clone(),
                        reached: current.to_owned(),
                    });
                }
                if visited.insert(next.as_str()) {
                    stack.push(next.as_str());
                }
            }
        }
    }
    Ok(())
}

/// Fail if any step has more than one upstream step.
pub fn assert_single_inputs(model: &DependencyModel) -> Result<(), ValidationError> {
    match model.nodes.iter().find(|(_, node)| node.up.len() > 1) {
        Some((id, _)) => Err(ValidationError::MultipleDependencies(id.clone())),
        None => Ok(()),
    }
}
