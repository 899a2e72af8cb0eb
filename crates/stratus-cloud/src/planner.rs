//! Plan computation
//!
//! Compares the resource graph with the recorded state. No provider calls are made.

use crate::action::{Action, ActionType, Plan, diff_properties};
use crate::provider::{OutputValue, Outputs, ResolvedInputs};
use crate::state::StackState;
use std::collections::{BTreeMap, BTreeSet};
use stratus_core::{GraphError, RemovalPolicy, ResourceGraph, ResourceNode, ResourceSpec};
use tracing::debug;

pub(crate) const RETAINED_NOTE: &str = "retained by removal policy";
pub(crate) const RETAINED_DEPENDENCY_NOTE: &str = "retained: required by a retained resource";
pub(crate) const NOT_IN_STATE_NOTE: &str = "not in state";
const INPUTS_AFTER_APPLY_NOTE: &str = "upstream outputs known after apply";

/// Whether destroy must leave the resource in place
pub fn is_retained(node: &ResourceNode) -> bool {
    matches!(
        &node.spec,
        ResourceSpec::Database(db) if db.removal_policy == RemovalPolicy::Retain
    )
}

/// Nodes destroy leaves in place: retained resources and everything they depend on
pub fn retained_nodes(graph: &ResourceGraph) -> BTreeSet<String> {
    let mut retained = BTreeSet::new();
    let mut stack: Vec<&ResourceNode> = graph.nodes().filter(|n| is_retained(n)).collect();
    while let Some(node) = stack.pop() {
        if retained.insert(node.name.clone()) {
            stack.extend(node.depends_on.iter().filter_map(|d| graph.get(d)));
        }
    }
    retained
}

/// Plan an apply: graph nodes in topological order, then orphaned state entries
///
/// A node whose properties are unchanged is still updated when the upstream
/// outputs its references resolve to differ from the ones it was applied with.
pub fn plan_apply(graph: &ResourceGraph, state: &StackState) -> Result<Plan, GraphError> {
    let mut actions = Vec::with_capacity(graph.len());
    // Outputs of nodes that stay in place, as recorded
    let mut known: BTreeMap<String, Outputs> = BTreeMap::new();

    for name in graph.topological_order()? {
        let node = graph
            .get(&name)
            .ok_or_else(|| GraphError::NodeNotFound(name.clone()))?;
        let desired = node.spec.properties();

        let action = match state.get(&name) {
            None => Action::new(&name, node.kind(), ActionType::Create)
                .with_changes(diff_properties(&serde_json::json!({}), &desired)),
            Some(recorded) => {
                let mut changes = if recorded.spec == node.spec {
                    Vec::new()
                } else {
                    diff_properties(&recorded.spec.properties(), &desired)
                };
                let action = match ResolvedInputs::for_node(node, &known) {
                    Ok(inputs)
                        if changes.is_empty() && inputs.matches_recorded(&recorded.inputs) =>
                    {
                        Action::new(&name, node.kind(), ActionType::NoOp)
                    }
                    Ok(inputs) => {
                        changes.extend(diff_properties(
                            &inputs_payload(&recorded.inputs),
                            &inputs_payload(&inputs.to_recorded()),
                        ));
                        Action::new(&name, node.kind(), ActionType::Update).with_changes(changes)
                    }
                    Err(_) => Action::new(&name, node.kind(), ActionType::Update)
                        .with_changes(changes)
                        .with_note(INPUTS_AFTER_APPLY_NOTE),
                };
                known.insert(name.clone(), recorded.outputs.clone());
                action
            }
        };
        actions.push(action);
    }

    let names: BTreeSet<&str> = graph.names().iter().map(String::as_str).collect();
    for (name, recorded) in state.orphans(&names) {
        actions.push(Action::new(name, recorded.kind(), ActionType::Delete));
    }

    let plan = Plan::new(&state.stack_id, actions);
    debug!(summary = %plan.summary(), "Computed apply plan");
    Ok(plan)
}

fn inputs_payload(inputs: &BTreeMap<String, OutputValue>) -> serde_json::Value {
    serde_json::Value::Object(
        inputs
            .iter()
            .map(|(reference, value)| (reference.clone(), value.to_payload()))
            .collect(),
    )
}

/// Plan a destroy: orphaned state entries, then graph nodes in reverse topological order
pub fn plan_destroy(graph: &ResourceGraph, state: &StackState) -> Result<Plan, GraphError> {
    let mut actions = Vec::with_capacity(graph.len());

    let names: BTreeSet<&str> = graph.names().iter().map(String::as_str).collect();
    for (name, recorded) in state.orphans(&names) {
        actions.push(Action::new(name, recorded.kind(), ActionType::Delete));
    }

    let retained = retained_nodes(graph);
    for name in graph.reverse_topological_order()? {
        let node = graph
            .get(&name)
            .ok_or_else(|| GraphError::NodeNotFound(name.clone()))?;

        let action = if !state.contains(&name) {
            Action::new(&name, node.kind(), ActionType::NoOp).with_note(NOT_IN_STATE_NOTE)
        } else if is_retained(node) {
            Action::new(&name, node.kind(), ActionType::NoOp).with_note(RETAINED_NOTE)
        } else if retained.contains(&name) {
            Action::new(&name, node.kind(), ActionType::NoOp).with_note(RETAINED_DEPENDENCY_NOTE)
        } else {
            Action::new(&name, node.kind(), ActionType::Delete)
        };
        actions.push(action);
    }

    let plan = Plan::new(&state.stack_id, actions);
    debug!(summary = %plan.summary(), "Computed destroy plan");
    Ok(plan)
}
