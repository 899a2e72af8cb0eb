//! マネージドデータベース

use super::reference::Reference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use stratus_config::{ConfigValue, FromConfigValue};

/// データベースエンジン
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Mysql,
    Postgres,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql => "mysql",
            DatabaseEngine::Postgres => "postgres",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseEngine::Mysql => 3306,
            DatabaseEngine::Postgres => 5432,
        }
    }

    /// パラメータグループのファミリー名（例: 8.0.16 → mysql8.0, 15.4 → postgres15）
    pub fn parameter_family(&self, engine_version: &str) -> String {
        let mut parts = engine_version.split('.');
        let major = parts.next().unwrap_or_default();
        match self {
            DatabaseEngine::Mysql => {
                let minor = parts.next().unwrap_or("0");
                format!("mysql{}.{}", major, minor)
            }
            DatabaseEngine::Postgres => format!("postgres{}", major),
        }
    }

    /// コンテナに渡す接続用環境変数名のプレフィックス
    pub fn env_prefix(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql => "MYSQL",
            DatabaseEngine::Postgres => "POSTGRES",
        }
    }

    /// データベース名を渡す環境変数名
    pub fn database_env_var(&self) -> &'static str {
        match self {
            DatabaseEngine::Mysql => "MYSQL_DATABASE",
            DatabaseEngine::Postgres => "POSTGRES_DB",
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(DatabaseEngine::Mysql),
            "postgres" | "postgresql" => Ok(DatabaseEngine::Postgres),
            _ => Err(format!("未知のデータベースエンジン: {}", s)),
        }
    }
}

impl FromConfigValue for DatabaseEngine {
    fn expected() -> String {
        "mysql | postgres".to_string()
    }

    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        value.as_str()?.parse().ok()
    }
}

/// destroy 時の扱い
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// 削除する
    #[default]
    Destroy,
    /// 残す（state からは外す）
    Retain,
    /// 最終スナップショットを取ってから削除する
    Snapshot,
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalPolicy::Destroy => write!(f, "destroy"),
            RemovalPolicy::Retain => write!(f, "retain"),
            RemovalPolicy::Snapshot => write!(f, "snapshot"),
        }
    }
}

impl FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "destroy" => Ok(RemovalPolicy::Destroy),
            "retain" => Ok(RemovalPolicy::Retain),
            "snapshot" => Ok(RemovalPolicy::Snapshot),
            _ => Err(format!("未知の削除ポリシー: {}", s)),
        }
    }
}

impl FromConfigValue for RemovalPolicy {
    fn expected() -> String {
        "destroy | retain | snapshot".to_string()
    }

    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        value.as_str()?.parse().ok()
    }
}

/// マネージドデータベースインスタンス
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    /// インスタンス識別子
    pub identifier: String,
    pub engine: DatabaseEngine,
    pub engine_version: String,
    /// 初期作成するデータベース名
    pub database_name: String,
    /// インスタンスクラス（例: db.t3.micro）
    pub instance_class: String,
    pub allocated_storage_gb: u32,
    pub storage_type: String,
    pub storage_encrypted: bool,
    pub port: u16,
    pub master_username: String,
    /// マスターパスワード（シークレットノードへの参照）
    pub master_password: Reference,
    pub security_group: Reference,
    /// 配置するサブネット
    pub subnets: Reference,
    pub backup_window: Option<String>,
    pub backup_retention_days: u32,
    pub maintenance_window: Option<String>,
    pub removal_policy: RemovalPolicy,
    pub deletion_protection: bool,
    /// パラメータグループのファミリー
    pub parameter_family: String,
    /// パラメータグループに設定する値
    pub parameters: BTreeMap<String, String>,
}

impl DatabaseSpec {
    pub fn references(&self) -> Vec<&Reference> {
        vec![&self.master_password, &self.security_group, &self.subnets]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_family() {
        assert_eq!(DatabaseEngine::Mysql.parameter_family("8.0.16"), "mysql8.0");
        assert_eq!(DatabaseEngine::Postgres.parameter_family("15.4"), "postgres15");
    }

    #[test]
    fn test_removal_policy_from_str() {
        assert_eq!("Retain".parse::<RemovalPolicy>().unwrap(), RemovalPolicy::Retain);
        assert!("keep".parse::<RemovalPolicy>().is_err());
    }
}
