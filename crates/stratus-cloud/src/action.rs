//! Action types for resource management

use serde::{Deserialize, Serialize};
use std::fmt;
use stratus_core::ResourceKind;

/// Represents a planned action for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Node name
    pub node: String,

    pub kind: ResourceKind,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Property-level changes (empty for no-op)
    pub changes: Vec<PropertyChange>,

    /// Why the action differs from the obvious one (e.g. retained on destroy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Action {
    pub fn new(node: impl Into<String>, kind: ResourceKind, action_type: ActionType) -> Self {
        Self {
            node: node.into(),
            kind,
            action_type,
            changes: Vec::new(),
            note: None,
        }
    }

    pub fn with_changes(mut self, changes: Vec<PropertyChange>) -> Self {
        self.changes = changes;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl ActionType {
    /// Diff marker
    pub fn marker(&self) -> char {
        match self {
            ActionType::Create => '+',
            ActionType::Update => '~',
            ActionType::Delete => '-',
            ActionType::NoOp => ' ',
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// A single changed property, addressed by dotted path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub path: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

impl PropertyChange {
    pub fn marker(&self) -> char {
        match (&self.before, &self.after) {
            (None, Some(_)) => '+',
            (Some(_), None) => '-',
            _ => '~',
        }
    }
}

impl fmt::Display for PropertyChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.before, &self.after) {
            (None, Some(after)) => write!(f, "+ {} = {}", self.path, after),
            (Some(before), None) => write!(f, "- {} = {}", self.path, before),
            (Some(before), Some(after)) => {
                write!(f, "~ {}: {} -> {}", self.path, before, after)
            }
            (None, None) => write!(f, "  {}", self.path),
        }
    }
}

/// Compute property-level changes between two JSON documents
///
/// Objects are walked recursively; any other value is compared as a whole.
pub fn diff_properties(
    before: &serde_json::Value,
    after: &serde_json::Value,
) -> Vec<PropertyChange> {
    let mut changes = Vec::new();
    diff_into("", Some(before), Some(after), &mut changes);
    changes
}

fn diff_into(
    path: &str,
    before: Option<&serde_json::Value>,
    after: Option<&serde_json::Value>,
    changes: &mut Vec<PropertyChange>,
) {
    use serde_json::Value;

    match (before, after) {
        (Some(Value::Object(b)), Some(Value::Object(a))) => {
            let keys: std::collections::BTreeSet<&String> = b.keys().chain(a.keys()).collect();
            for key in keys {
                diff_into(&join(path, key), b.get(key), a.get(key), changes);
            }
        }
        (Some(Value::Object(b)), None) => {
            for (key, value) in b {
                diff_into(&join(path, key), Some(value), None, changes);
            }
        }
        (None, Some(Value::Object(a))) => {
            for (key, value) in a {
                diff_into(&join(path, key), None, Some(value), changes);
            }
        }
        (b, a) if b == a => {}
        (b, a) => changes.push(PropertyChange {
            path: path.to_string(),
            before: b.cloned(),
            after: a.cloned(),
        }),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

/// Plan containing all actions, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub stack_id: String,

    /// List of actions to perform
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(stack_id: impl Into<String>, actions: Vec<Action>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            stack_id: stack_id.into(),
            actions,
            has_changes,
        }
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    pub fn get(&self, node: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.node == node)
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Human-readable diff
impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for action in &self.actions {
            write!(f, "{} {} ({})", action.action_type.marker(), action.node, action.kind)?;
            if let Some(note) = &action.note {
                write!(f, " [{}]", note)?;
            }
            writeln!(f)?;
            for change in &action.changes {
                writeln!(f, "    {}", change)?;
            }
        }
        write!(f, "\nPlan: {}", self.summary())
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_properties_nested() {
        let before = json!({ "desired_count": 1, "environment": { "MODE": "dev", "OLD": "x" } });
        let after = json!({ "desired_count": 2, "environment": { "MODE": "dev", "NEW": "y" } });

        let changes = diff_properties(&before, &after);
        let rendered: Vec<String> = changes.iter().map(|c| c.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "~ desired_count: 1 -> 2",
                "+ environment.NEW = \"y\"",
                "- environment.OLD = \"x\"",
            ]
        );
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let value = json!({ "cidr": "10.0.0.0/16", "subnet_cidrs": ["10.0.0.0/24"] });
        assert!(diff_properties(&value, &value).is_empty());
    }

    #[test]
    fn test_plan_rendering() {
        let plan = Plan::new(
            "demo-staging",
            vec![
                Action::new("network", ResourceKind::Network, ActionType::Create).with_changes(
                    diff_properties(&json!({}), &json!({ "cidr": "10.0.0.0/16" })),
                ),
                Action::new("cluster", ResourceKind::Cluster, ActionType::NoOp),
                Action::new("old", ResourceKind::Service, ActionType::Delete),
            ],
        );

        let text = plan.to_string();
        assert!(text.contains("+ network (network)\n    + cidr = \"10.0.0.0/16\""));
        assert!(text.contains("- old (service)"));
        assert!(text.ends_with("1 to create, 0 to update, 1 to delete, 1 unchanged"));
        assert!(plan.has_changes);
    }
}
