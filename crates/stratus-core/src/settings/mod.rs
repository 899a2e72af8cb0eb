//! 型付きスタック設定
//!
//! [`ConfigTree`] を検証して、グラフ構築に必要な設定をすべて読み出します。
//! ノードを1つも構築する前に全設定を読み切るため、設定エラーは必ずグラフ構築より先に報告されます。
//! 各リソース種別の読み込み処理はモジュールに分離されています。

mod database;
mod network;
mod service;

pub use database::{DatabaseSettings, SecretSettings};
pub use network::NetworkSettings;
pub use service::{ServiceSecretSettings, ServiceSettings};

use stratus_config::{ConfigError, ConfigTree, Result};
use tracing::debug;

const DEFAULT_STACK_NAME: &str = "stratus";
const DEFAULT_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_PARALLELISM: usize = 4;

/// スタック全体の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSettings {
    pub name: String,
    pub environment: String,
    /// 1回の実行全体のタイムアウト
    pub timeout_secs: u64,
    pub parallelism: usize,
    pub network: NetworkSettings,
    pub domain_name: String,
    pub certificate_arn: Option<String>,
    pub cluster_name: String,
    /// 1つ以上のサービスが使うか、明示的に有効化された場合のみ Some
    pub database: Option<DatabaseSettings>,
    /// サービス名順
    pub services: Vec<ServiceSettings>,
}

impl StackSettings {
    /// 設定ツリーから読み込む
    pub fn from_tree(tree: &ConfigTree, environment: &str) -> Result<Self> {
        let name: String = tree.get_or("stack.name", DEFAULT_STACK_NAME.to_string())?;
        let stack_id = format!("{}-{}", name, environment.to_ascii_lowercase());

        let timeout_secs = tree.get_or("stack.timeout_secs", DEFAULT_TIMEOUT_SECS)?;
        let parallelism = tree.get_or("stack.parallelism", DEFAULT_PARALLELISM)?;
        if parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                key: "stack.parallelism".to_string(),
                expected: "1 以上の整数".to_string(),
                found: "0".to_string(),
            });
        }

        let network = network::parse_network(tree)?;
        let domain_name: String = tree.require("dns.domain_name")?;

        let services = tree
            .children("services")
            .iter()
            .map(|name| service::parse_service(tree, name))
            .collect::<Result<Vec<_>>>()?;

        let certificate_arn = if services.is_empty() {
            tree.get("certificate.arn")?
        } else {
            Some(tree.require("certificate.arn")?)
        };

        let enabled: Option<bool> = tree.get("database.enabled")?;
        if enabled == Some(false)
            && let Some(user) = services.iter().find(|s| s.use_database)
        {
            return Err(ConfigError::InvalidValue {
                key: format!("services.{}.use_database", user.name),
                expected: "database.enabled が false の場合は false".to_string(),
                found: "true".to_string(),
            });
        }
        let needs_database = enabled == Some(true) || services.iter().any(|s| s.use_database);
        let database = if needs_database {
            Some(database::parse_database(tree, &stack_id)?)
        } else {
            None
        };

        let cluster_name = tree.get_or("cluster.name", format!("{}-cluster", stack_id))?;

        debug!(
            stack = %stack_id,
            services = services.len(),
            database = database.is_some(),
            "Parsed stack settings"
        );

        Ok(Self {
            name,
            environment: environment.to_string(),
            timeout_secs,
            parallelism,
            network,
            domain_name,
            certificate_arn,
            cluster_name,
            database,
            services,
        })
    }

    /// スタック識別子（`<name>-<environment>`）
    ///
    /// state ファイルの置き場所とプロバイダー側の名前付けに使う。
    pub fn stack_id(&self) -> String {
        format!("{}-{}", self.name, self.environment.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests;
