//! リソースグラフ
//!
//! 全ノードを所有する有向非巡回グラフ。
//! ノードは登録済みのノードしか参照できないため、登録順がそのまま有効な依存順になる。

use crate::error::GraphError;
use crate::model::ResourceNode;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// リソースノードの DAG
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceGraph {
    nodes: BTreeMap<String, ResourceNode>,
    /// 登録順
    order: Vec<String>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// ノードを登録
    ///
    /// 参照先がまだ登録されていない場合は即座に失敗する。
    pub fn insert(&mut self, node: ResourceNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.name) {
            return Err(GraphError::DuplicateNode(node.name));
        }
        for dependency in &node.depends_on {
            if dependency == &node.name {
                return Err(GraphError::SelfReference(node.name.clone()));
            }
            if !self.nodes.contains_key(dependency) {
                return Err(GraphError::UnresolvedReference {
                    node: node.name.clone(),
                    target: dependency.clone(),
                });
            }
        }

        debug!(node = %node.name, kind = %node.kind(), "Registered node");
        self.order.push(node.name.clone());
        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 登録順にノードを列挙
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    /// 登録順のノード名
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// 直接の依存元（このノードを参照しているノード）
    pub fn dependents(&self, name: &str) -> BTreeSet<&str> {
        self.nodes
            .values()
            .filter(|n| n.depends_on.contains(name))
            .map(|n| n.name.as_str())
            .collect()
    }

    /// 推移的な依存元
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents(&current) {
                if found.insert(dependent.to_string()) {
                    stack.push(dependent.to_string());
                }
            }
        }
        found
    }

    /// トポロジカル順序
    ///
    /// 順序制約のないノード同士はノード名順に並べるため、結果は常に決定的。
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut remaining: BTreeMap<&str, usize> = self
            .nodes
            .values()
            .map(|n| (n.name.as_str(), n.depends_on.len()))
            .collect();
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(name) = ready.pop_first() {
            remaining.remove(name);
            sorted.push(name.to_string());
            for dependent in self.dependents(name) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if !remaining.is_empty() {
            let cycle: Vec<&str> = remaining.keys().copied().collect();
            return Err(GraphError::CircularDependency(cycle.join(" -> ")));
        }

        Ok(sorted)
    }

    /// 逆トポロジカル順序（destroy 用）
    pub fn reverse_topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// 不変条件を再検証（参照の解決可能性と非巡回性）
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            for dependency in &node.depends_on {
                if dependency == &node.name {
                    return Err(GraphError::SelfReference(node.name.clone()));
                }
                if !self.nodes.contains_key(dependency) {
                    return Err(GraphError::UnresolvedReference {
                        node: node.name.clone(),
                        target: dependency.clone(),
                    });
                }
            }
        }
        self.topological_order().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ClusterSpec, DnsZoneSpec, NetworkSpec, Reference, ResourceSpec, SecretSpec, outputs,
    };

    fn network() -> ResourceNode {
        ResourceNode::new(
            "network",
            ResourceSpec::Network(NetworkSpec {
                cidr: "10.0.0.0/16".to_string(),
                subnet_cidrs: vec!["10.0.0.0/24".to_string()],
            }),
        )
    }

    fn cluster(name: &str) -> ResourceNode {
        ResourceNode::new(
            name,
            ResourceSpec::Cluster(ClusterSpec {
                cluster_name: name.to_string(),
                vpc: Reference::new("network", outputs::ID),
            }),
        )
    }

    fn zone() -> ResourceNode {
        ResourceNode::new(
            "dns-zone",
            ResourceSpec::DnsZone(DnsZoneSpec {
                domain_name: "example.com".to_string(),
            }),
        )
    }

    #[test]
    fn test_forward_reference_rejected() {
        let mut graph = ResourceGraph::new();
        let err = graph.insert(cluster("cluster")).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnresolvedReference {
                node: "cluster".to_string(),
                target: "network".to_string(),
            }
        );
        assert!(graph.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut graph = ResourceGraph::new();
        graph.insert(network()).unwrap();
        let err = graph.insert(network()).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("network".to_string()));
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut graph = ResourceGraph::new();
        let node = ResourceNode::new(
            "loop",
            ResourceSpec::Cluster(ClusterSpec {
                cluster_name: "loop".to_string(),
                vpc: Reference::new("loop", outputs::ID),
            }),
        );
        assert_eq!(
            graph.insert(node).unwrap_err(),
            GraphError::SelfReference("loop".to_string())
        );
    }

    #[test]
    fn test_topological_order_breaks_ties_by_name() {
        let mut graph = ResourceGraph::new();
        graph.insert(zone()).unwrap();
        graph.insert(network()).unwrap();
        graph.insert(cluster("zeta")).unwrap();
        graph.insert(cluster("alpha")).unwrap();
        graph
            .insert(ResourceNode::new(
                "app-secret",
                ResourceSpec::Secret(SecretSpec::new("app-secret")),
            ))
            .unwrap();

        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["app-secret", "dns-zone", "network", "alpha", "zeta"]
        );
        assert_eq!(
            graph.reverse_topological_order().unwrap(),
            vec!["zeta", "alpha", "network", "dns-zone", "app-secret"]
        );
    }

    #[test]
    fn test_transitive_dependents() {
        let mut graph = ResourceGraph::new();
        graph.insert(network()).unwrap();
        graph.insert(cluster("cluster")).unwrap();
        graph.insert(zone()).unwrap();

        let dependents = graph.transitive_dependents("network");
        assert_eq!(dependents.len(), 1);
        assert!(dependents.contains("cluster"));
        assert!(graph.transitive_dependents("dns-zone").is_empty());
    }

    #[test]
    fn test_nodes_iterate_in_insertion_order() {
        let mut graph = ResourceGraph::new();
        graph.insert(zone()).unwrap();
        graph.insert(network()).unwrap();

        let names: Vec<_> = graph.nodes().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["dns-zone", "network"]);
        assert!(graph.validate().is_ok());
    }
}
