//! サービス設定の読み込み

use super::database::SecretSettings;
use std::collections::BTreeMap;
use stratus_config::{ConfigError, ConfigTree, Result};

const DEFAULT_DESIRED_COUNT: u32 = 1;
const DEFAULT_MEMORY_LIMIT_MIB: u32 = 512;
const DEFAULT_CONTAINER_PORT: u16 = 80;

/// サービスに注入する生成シークレット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSecretSettings {
    /// 注入先の環境変数名
    pub env_var: String,
    /// シークレットノード名
    pub node_name: String,
    pub generation: SecretSettings,
}

/// サービス設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub name: String,
    pub image: String,
    pub desired_count: u32,
    pub subdomain: String,
    pub memory_limit_mib: u32,
    pub container_port: u16,
    pub use_database: bool,
    /// サービスが使うデータベース名（省略時は database.name）
    pub database_name: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub secrets: Vec<ServiceSecretSettings>,
}

impl ServiceSettings {
    /// 公開ホスト名（subdomain.domain）
    pub fn hostname(&self, domain_name: &str) -> String {
        format!("{}.{}", self.subdomain, domain_name)
    }
}

/// `services.<name>.*` を読み込む
pub(crate) fn parse_service(tree: &ConfigTree, name: &str) -> Result<ServiceSettings> {
    validate_service_name(name)?;
    let key = |suffix: &str| format!("services.{}.{}", name, suffix);

    let environment = tree
        .section(&key("environment"))
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();

    let mut secrets = Vec::new();
    for env_var in tree.children(&key("secrets")) {
        let base = key(&format!("secrets.{}", env_var));
        // スカラー値なら文字数として扱う
        let length = match tree.get::<u32>(&base)? {
            Some(length) => length,
            None => tree.get_or(&format!("{}.length", base), SecretSettings::default().length)?,
        };
        let exclude_characters = tree.get_or(
            &format!("{}.exclude_characters", base),
            SecretSettings::default().exclude_characters,
        )?;
        let node_name = tree.get_or(
            &format!("{}.name", base),
            format!("{}-{}", name, env_var.to_ascii_lowercase().replace('_', "-")),
        )?;
        secrets.push(ServiceSecretSettings {
            env_var,
            node_name,
            generation: SecretSettings {
                length,
                exclude_characters,
            },
        });
    }

    Ok(ServiceSettings {
        name: name.to_string(),
        image: tree.require(&key("image"))?,
        desired_count: tree.get_or(&key("desired_count"), DEFAULT_DESIRED_COUNT)?,
        subdomain: tree.require(&key("subdomain"))?,
        memory_limit_mib: tree.get_or(&key("memory_limit_mib"), DEFAULT_MEMORY_LIMIT_MIB)?,
        container_port: tree.get_or(&key("container_port"), DEFAULT_CONTAINER_PORT)?,
        use_database: tree.get_or(&key("use_database"), false)?,
        database_name: tree.get(&key("database_name"))?,
        environment,
        secrets,
    })
}

fn validate_service_name(name: &str) -> Result<()> {
    let valid = name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: format!("services.{}", name),
            expected: "英小文字で始まる英小文字・数字・ハイフンのサービス名".to_string(),
            found: name.to_string(),
        })
    }
}
