//! ネットワーク系リソース（VPC・セキュリティグループ・クラスター）

use super::reference::Reference;
use serde::{Deserialize, Serialize};

/// 仮想ネットワーク
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// VPC の CIDR ブロック
    pub cidr: String,
    /// サブネットの CIDR（アベイラビリティゾーンごとに1つ）
    pub subnet_cidrs: Vec<String>,
}

impl NetworkSpec {
    pub fn references(&self) -> Vec<&Reference> {
        Vec::new()
    }
}

/// インバウンドルール
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: String,
    pub port: u16,
    pub cidr: String,
    pub description: String,
}

impl IngressRule {
    /// 任意の IPv4 から TCP ポートを許可
    pub fn tcp_from_anywhere(port: u16, description: impl Into<String>) -> Self {
        Self {
            protocol: "tcp".to_string(),
            port,
            cidr: "0.0.0.0/0".to_string(),
            description: description.into(),
        }
    }
}

/// セキュリティグループ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub group_name: String,
    pub description: String,
    /// 所属する VPC
    pub vpc: Reference,
    pub ingress: Vec<IngressRule>,
    /// 全アウトバウンド通信を許可するか
    pub allow_all_egress: bool,
}

impl SecurityGroupSpec {
    pub fn references(&self) -> Vec<&Reference> {
        vec![&self.vpc]
    }
}

/// コンテナクラスター
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_name: String,
    /// 所属する VPC
    pub vpc: Reference,
}

impl ClusterSpec {
    pub fn references(&self) -> Vec<&Reference> {
        vec![&self.vpc]
    }
}
