//! Ownership tags
//!
//! Every created resource carries the stack id and node name so that it can be
//! found again when no outputs were recorded (e.g. a create whose response was lost).

use serde_json::{Value, json};

pub const STACK_TAG: &str = "stratus:stack";
pub const NODE_TAG: &str = "stratus:node";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTags {
    pub stack_id: String,
    pub node: String,
}

impl ResourceTags {
    pub fn new(stack_id: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            stack_id: stack_id.into(),
            node: node.into(),
        }
    }

    fn pairs(&self) -> [(&str, &str); 2] {
        [(STACK_TAG, self.stack_id.as_str()), (NODE_TAG, self.node.as_str())]
    }

    /// `Key`/`Value` list used by EC2, RDS, ELBv2 and Secrets Manager
    pub fn pascal(&self) -> Value {
        Value::Array(
            self.pairs()
                .iter()
                .map(|(k, v)| json!({ "Key": k, "Value": v }))
                .collect(),
        )
    }

    /// `key`/`value` list used by ECS
    pub fn camel(&self) -> Value {
        Value::Array(
            self.pairs()
                .iter()
                .map(|(k, v)| json!({ "key": k, "value": v }))
                .collect(),
        )
    }

    /// EC2 `--tag-specifications` document, including a `Name` tag
    pub fn ec2_specification(&self, resource_type: &str) -> Value {
        let mut tags = self.pascal();
        if let Value::Array(items) = &mut tags {
            items.push(json!({ "Key": "Name", "Value": format!("{}-{}", self.stack_id, self.node) }));
        }
        json!([{ "ResourceType": resource_type, "Tags": tags }])
    }

    /// EC2 describe `--filters` matching these tags
    pub fn ec2_filters(&self) -> Vec<String> {
        self.pairs()
            .iter()
            .map(|(k, v)| format!("Name=tag:{},Values={}", k, v))
            .collect()
    }

    /// Resource Groups Tagging API `--tag-filters`
    pub fn tag_filters(&self) -> Value {
        Value::Array(
            self.pairs()
                .iter()
                .map(|(k, v)| json!({ "Key": k, "Values": [v] }))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_formats() {
        let tags = ResourceTags::new("shop-staging", "network");

        assert_eq!(tags.pascal()[0]["Key"], STACK_TAG);
        assert_eq!(tags.camel()[1]["value"], "network");
        assert_eq!(
            tags.ec2_filters(),
            vec![
                "Name=tag:stratus:stack,Values=shop-staging",
                "Name=tag:stratus:node,Values=network",
            ]
        );

        let spec = tags.ec2_specification("vpc");
        assert_eq!(spec[0]["ResourceType"], "vpc");
        assert_eq!(spec[0]["Tags"][2]["Value"], "shop-staging-network");
        assert_eq!(tags.tag_filters()[1]["Values"][0], "network");
    }
}
