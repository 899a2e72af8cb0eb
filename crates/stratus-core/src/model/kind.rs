//! リソース種別

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// リソースノードの種別タグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// 仮想ネットワーク（VPC とサブネット）
    Network,
    /// セキュリティグループ
    SecurityGroup,
    /// コンテナクラスター
    Cluster,
    /// DNS ホストゾーン
    DnsZone,
    /// 生成されるシークレット
    Secret,
    /// マネージドデータベース
    Database,
    /// ロードバランサー（ターゲットグループ・HTTPS リスナー込み）
    LoadBalancer,
    /// コンテナサービス
    Service,
    /// DNS レコード
    DnsRecord,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Network,
        ResourceKind::SecurityGroup,
        ResourceKind::Cluster,
        ResourceKind::DnsZone,
        ResourceKind::Secret,
        ResourceKind::Database,
        ResourceKind::LoadBalancer,
        ResourceKind::Service,
        ResourceKind::DnsRecord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::Cluster => "cluster",
            ResourceKind::DnsZone => "dns-zone",
            ResourceKind::Secret => "secret",
            ResourceKind::Database => "database",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::Service => "service",
            ResourceKind::DnsRecord => "dns-record",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("未知のリソース種別: {}", s))
    }
}
