//! ロードバランス付きコンテナサービス

use super::reference::{Interpolated, Reference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTPS リスナー付きアプリケーションロードバランサー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    pub lb_name: String,
    /// 所属する VPC
    pub vpc: Reference,
    /// 配置するサブネット
    pub subnets: Reference,
    /// HTTPS リスナーの証明書
    pub certificate_arn: String,
    pub listener_port: u16,
    /// ターゲット（コンテナ）側のポート
    pub target_port: u16,
    pub health_check_path: String,
}

impl LoadBalancerSpec {
    pub fn references(&self) -> Vec<&Reference> {
        vec![&self.vpc, &self.subnets]
    }
}

/// コンテナサービス
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub service_name: String,
    pub container_name: String,
    /// コンテナイメージ参照
    pub image: String,
    pub desired_count: u32,
    pub memory_limit_mib: u32,
    pub container_port: u16,
    /// 公開ホスト名
    pub hostname: String,
    pub cluster: Reference,
    pub subnets: Reference,
    /// 登録先ターゲットグループ
    pub target_group: Reference,
    /// 環境変数（参照を含みうる）
    pub environment: BTreeMap<String, Interpolated>,
    /// シークレットとして注入する環境変数（シークレットノードへの参照）
    pub secrets: BTreeMap<String, Reference>,
}

impl ServiceSpec {
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = vec![&self.cluster, &self.subnets, &self.target_group];
        for value in self.environment.values() {
            refs.extend(value.references());
        }
        refs.extend(self.secrets.values());
        refs
    }
}
