//! データベース設定の読み込み

use crate::model::{DEFAULT_EXCLUDE_CHARACTERS, DEFAULT_SECRET_LENGTH, DatabaseEngine, RemovalPolicy};
use std::collections::BTreeMap;
use stratus_config::{ConfigTree, Result};

const DEFAULT_ENGINE_VERSION: &str = "8.0.16";
const DEFAULT_RETENTION_DAYS: u32 = 7;

/// シークレット生成パラメータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSettings {
    pub length: u32,
    pub exclude_characters: String,
}

impl Default for SecretSettings {
    fn default() -> Self {
        Self {
            length: DEFAULT_SECRET_LENGTH,
            exclude_characters: DEFAULT_EXCLUDE_CHARACTERS.to_string(),
        }
    }
}

/// データベース設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub identifier: String,
    pub engine: DatabaseEngine,
    pub engine_version: String,
    pub database_name: String,
    /// 例: db.t3.micro
    pub instance_class: String,
    pub allocated_storage_gb: u32,
    pub port: u16,
    pub username: String,
    pub password: SecretSettings,
    pub backup_window: Option<String>,
    pub backup_retention_days: u32,
    pub maintenance_window: Option<String>,
    pub removal_policy: RemovalPolicy,
    pub storage_encrypted: bool,
    pub parameters: BTreeMap<String, String>,
}

/// `database.*` を読み込む
pub(crate) fn parse_database(tree: &ConfigTree, stack_id: &str) -> Result<DatabaseSettings> {
    let engine = tree.get_or("database.engine", DatabaseEngine::Mysql)?;
    let engine_version = match tree.get::<String>("database.engine_version")? {
        Some(v) => v,
        None if engine == DatabaseEngine::Mysql => DEFAULT_ENGINE_VERSION.to_string(),
        None => return Err(stratus_config::ConfigError::MissingKey(
            "database.engine_version".to_string(),
        )),
    };

    let instance_class: String = tree.require("database.instance_class")?;
    let instance_size: String = tree.require("database.instance_size")?;

    let mut parameters: BTreeMap<String, String> = tree
        .section("database.parameters")
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();
    if parameters.is_empty() && engine == DatabaseEngine::Mysql {
        // 4バイト文字を扱うアプリ向けのデフォルト
        parameters.insert("innodb_file_per_table".to_string(), "1".to_string());
    }

    Ok(DatabaseSettings {
        identifier: tree.get_or("database.identifier", format!("{}-db", stack_id))?,
        engine,
        engine_version,
        database_name: tree.require("database.name")?,
        instance_class: format!("db.{}.{}", instance_class, instance_size),
        allocated_storage_gb: tree.require("database.allocated_storage_gb")?,
        port: tree.get_or("database.port", engine.default_port())?,
        username: tree.require("database.username")?,
        password: SecretSettings {
            length: tree.get_or("database.password.length", DEFAULT_SECRET_LENGTH)?,
            exclude_characters: tree.get_or(
                "database.password.exclude_characters",
                DEFAULT_EXCLUDE_CHARACTERS.to_string(),
            )?,
        },
        backup_window: tree.get("database.backup.window")?,
        backup_retention_days: tree
            .get_or("database.backup.retention_days", DEFAULT_RETENTION_DAYS)?,
        maintenance_window: tree.get("database.maintenance_window")?,
        removal_policy: tree.get_or("database.removal_policy", RemovalPolicy::default())?,
        storage_encrypted: tree.get_or("database.storage_encrypted", true)?,
        parameters,
    })
}
