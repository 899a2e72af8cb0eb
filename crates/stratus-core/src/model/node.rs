//! リソースノード

use super::database::DatabaseSpec;
use super::dns::{DnsRecordSpec, DnsZoneSpec};
use super::kind::ResourceKind;
use super::network::{ClusterSpec, NetworkSpec, SecurityGroupSpec};
use super::reference::Reference;
use super::secret::SecretSpec;
use super::service::{LoadBalancerSpec, ServiceSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 種別タグ付きのリソースプロパティ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "properties", rename_all = "kebab-case")]
pub enum ResourceSpec {
    Network(NetworkSpec),
    SecurityGroup(SecurityGroupSpec),
    Cluster(ClusterSpec),
    DnsZone(DnsZoneSpec),
    Secret(SecretSpec),
    Database(DatabaseSpec),
    LoadBalancer(LoadBalancerSpec),
    Service(ServiceSpec),
    DnsRecord(DnsRecordSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Network(_) => ResourceKind::Network,
            ResourceSpec::SecurityGroup(_) => ResourceKind::SecurityGroup,
            ResourceSpec::Cluster(_) => ResourceKind::Cluster,
            ResourceSpec::DnsZone(_) => ResourceKind::DnsZone,
            ResourceSpec::Secret(_) => ResourceKind::Secret,
            ResourceSpec::Database(_) => ResourceKind::Database,
            ResourceSpec::LoadBalancer(_) => ResourceKind::LoadBalancer,
            ResourceSpec::Service(_) => ResourceKind::Service,
            ResourceSpec::DnsRecord(_) => ResourceKind::DnsRecord,
        }
    }

    /// プロパティに埋め込まれた全参照
    pub fn references(&self) -> Vec<&Reference> {
        match self {
            ResourceSpec::Network(s) => s.references(),
            ResourceSpec::SecurityGroup(s) => s.references(),
            ResourceSpec::Cluster(s) => s.references(),
            ResourceSpec::DnsZone(s) => s.references(),
            ResourceSpec::Secret(s) => s.references(),
            ResourceSpec::Database(s) => s.references(),
            ResourceSpec::LoadBalancer(s) => s.references(),
            ResourceSpec::Service(s) => s.references(),
            ResourceSpec::DnsRecord(s) => s.references(),
        }
    }

    /// 種別タグを除いたプロパティの JSON 表現（差分計算・state 記録用）
    pub fn properties(&self) -> serde_json::Value {
        let value = match self {
            ResourceSpec::Network(s) => serde_json::to_value(s),
            ResourceSpec::SecurityGroup(s) => serde_json::to_value(s),
            ResourceSpec::Cluster(s) => serde_json::to_value(s),
            ResourceSpec::DnsZone(s) => serde_json::to_value(s),
            ResourceSpec::Secret(s) => serde_json::to_value(s),
            ResourceSpec::Database(s) => serde_json::to_value(s),
            ResourceSpec::LoadBalancer(s) => serde_json::to_value(s),
            ResourceSpec::Service(s) => serde_json::to_value(s),
            ResourceSpec::DnsRecord(s) => serde_json::to_value(s),
        };
        value.unwrap_or_default()
    }
}

/// グラフ上の1リソース
///
/// 構築後は変更されない。依存先はプロパティ中の参照から導出される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// 安定したノード名
    pub name: String,
    pub spec: ResourceSpec,
    /// 依存先ノード名
    pub depends_on: BTreeSet<String>,
}

impl ResourceNode {
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        let depends_on = spec.references().into_iter().map(|r| r.node.clone()).collect();
        Self {
            name: name.into(),
            spec,
            depends_on,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn references(&self) -> Vec<&Reference> {
        self.spec.references()
    }
}
