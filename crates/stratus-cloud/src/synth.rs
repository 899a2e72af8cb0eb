//! Deployable document synthesis
//!
//! Renders the resource graph as a self-contained JSON document: nodes in
//! topological order with their kind, dependencies and properties. References
//! appear as `${node.output}` placeholders; secret values are never present.

use serde::{Deserialize, Serialize};
use stratus_core::{GraphError, ResourceGraph, ResourceKind};

const FORMAT_VERSION: u32 = 1;

/// Synthesized stack document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthDocument {
    pub format_version: u32,
    pub stack_id: String,
    pub resources: Vec<SynthResource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthResource {
    pub name: String,
    pub kind: ResourceKind,
    pub depends_on: Vec<String>,
    pub properties: serde_json::Value,
}

impl SynthDocument {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Build the deployable document for a graph
pub fn synthesize(stack_id: &str, graph: &ResourceGraph) -> Result<SynthDocument, GraphError> {
    let mut resources = Vec::with_capacity(graph.len());
    for name in graph.topological_order()? {
        let node = graph
            .get(&name)
            .ok_or_else(|| GraphError::NodeNotFound(name.clone()))?;
        resources.push(SynthResource {
            name: node.name.clone(),
            kind: node.kind(),
            depends_on: node.depends_on.iter().cloned().collect(),
            properties: node.spec.properties(),
        });
    }

    Ok(SynthDocument {
        format_version: FORMAT_VERSION,
        stack_id: stack_id.to_string(),
        resources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::{ClusterSpec, NetworkSpec, Reference, ResourceNode, ResourceSpec, outputs};

    #[test]
    fn test_synthesize_orders_and_renders_references() {
        let mut graph = ResourceGraph::new();
        graph
            .insert(ResourceNode::new(
                "network",
                ResourceSpec::Network(NetworkSpec {
                    cidr: "10.0.0.0/16".to_string(),
                    subnet_cidrs: vec![],
                }),
            ))
            .unwrap();
        graph
            .insert(ResourceNode::new(
                "cluster",
                ResourceSpec::Cluster(ClusterSpec {
                    cluster_name: "demo".to_string(),
                    vpc: Reference::new("network", outputs::ID),
                }),
            ))
            .unwrap();

        let doc = synthesize("demo-staging", &graph).unwrap();
        assert_eq!(doc.resources[0].name, "network");
        assert_eq!(doc.resources[1].depends_on, vec!["network"]);
        assert_eq!(doc.resources[1].properties["vpc"], "${network.id}");

        let json = doc.to_json_pretty().unwrap();
        assert!(json.contains("\"kind\": \"cluster\""));
    }
}
