//! 解決済みの設定ツリー
//!
//! ドット区切りのキーパスからスカラー値へのマッピング。
//! キーの検索は大文字小文字を区別しないが、最初に書かれた綴りを保持する。

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 設定のスカラー値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// JSON のスカラー値から変換（null・配列・オブジェクトは None）
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(ConfigValue::Bool(*b)),
            serde_json::Value::Number(n) => Some(ConfigValue::Number(n.clone())),
            serde_json::Value::String(s) => Some(ConfigValue::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Number(n) => write!(f, "{}", n),
            ConfigValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

/// 設定値から型付きの値への変換
///
/// 環境変数由来の値は常に文字列なので、数値・真偽値は文字列からもパースする。
pub trait FromConfigValue: Sized {
    /// エラーメッセージに使う期待値の説明
    fn expected() -> String;

    fn from_config_value(value: &ConfigValue) -> Option<Self>;
}

impl FromConfigValue for String {
    fn expected() -> String {
        "文字列".to_string()
    }

    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        Some(value.to_string())
    }
}

impl FromConfigValue for bool {
    fn expected() -> String {
        "true | false".to_string()
    }

    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            ConfigValue::Number(_) => None,
        }
    }
}

impl FromConfigValue for f64 {
    fn expected() -> String {
        "数値".to_string()
    }

    fn from_config_value(value: &ConfigValue) -> Option<Self> {
        match value {
            ConfigValue::Number(n) => n.as_f64(),
            ConfigValue::String(s) => s.trim().parse().ok(),
            ConfigValue::Bool(_) => None,
        }
    }
}

macro_rules! impl_from_config_value_for_int {
    ($($ty:ty),*) => {
        $(
            impl FromConfigValue for $ty {
                fn expected() -> String {
                    format!("整数 ({})", stringify!($ty))
                }

                fn from_config_value(value: &ConfigValue) -> Option<Self> {
                    match value {
                        ConfigValue::Number(n) => n
                            .as_i64()
                            .and_then(|v| <$ty>::try_from(v).ok())
                            .or_else(|| n.as_u64().and_then(|v| <$ty>::try_from(v).ok())),
                        ConfigValue::String(s) => s.trim().parse().ok(),
                        ConfigValue::Bool(_) => None,
                    }
                }
            }
        )*
    };
}

impl_from_config_value_for_int!(u16, u32, u64, usize, i32, i64);

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    key: String,
    value: ConfigValue,
}

/// マージ済みの設定ツリー
///
/// [`crate::ConfigLoader`] によってのみ構築され、構築後は変更されない。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
    entries: BTreeMap<String, Entry>,
    sources: Vec<String>,
}

impl ConfigTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 値を設定（既存キーの綴りは保持して値だけ上書き）
    pub(crate) fn set(&mut self, key: &str, value: ConfigValue) {
        let normalized = normalize(key);
        match self.entries.get_mut(&normalized) {
            Some(entry) => entry.value = value,
            None => {
                self.entries.insert(
                    normalized,
                    Entry {
                        key: key.to_string(),
                        value,
                    },
                );
            }
        }
    }

    /// キーとその配下をすべて削除（オーバーレイでの null 指定）
    pub(crate) fn remove(&mut self, key: &str) {
        let normalized = normalize(key);
        let prefix = format!("{}.", normalized);
        self.entries
            .retain(|k, _| k != &normalized && !k.starts_with(&prefix));
    }

    pub(crate) fn record_source(&mut self, name: String) {
        self.sources.push(name);
    }

    /// 適用された設定ソース名（適用順）
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize(key))
    }

    pub fn get_value(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(&normalize(key)).map(|e| &e.value)
    }

    /// 全キーを綴りどおりに列挙（キー順）
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|e| e.key.as_str())
    }

    /// 型付きで値を取得（存在しなければ `Ok(None)`）
    pub fn get<T: FromConfigValue>(&self, key: &str) -> Result<Option<T>> {
        match self.get_value(key) {
            None => Ok(None),
            Some(value) => T::from_config_value(value)
                .map(Some)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: key.to_string(),
                    expected: T::expected(),
                    found: value.to_string(),
                }),
        }
    }

    /// 必須キーを型付きで取得
    pub fn require<T: FromConfigValue>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    /// デフォルト値付きで取得
    pub fn get_or<T: FromConfigValue>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get_value(key).map(|v| v.to_string())
    }

    /// `prefix` 直下の子セグメント名（重複なし・ソート済み）
    pub fn children(&self, prefix: &str) -> Vec<String> {
        let prefix = format!("{}.", normalize(prefix));
        let mut seen = std::collections::BTreeSet::new();
        let mut children = Vec::new();

        for (normalized, entry) in &self.entries {
            if !normalized.starts_with(&prefix) {
                continue;
            }
            let Some(segment) = normalized[prefix.len()..].split('.').next() else {
                continue;
            };
            if seen.insert(segment.to_string()) {
                // 綴りは元のキーから取り出す
                let original = entry.key[prefix.len()..]
                    .split('.')
                    .next()
                    .unwrap_or(segment);
                children.push(original.to_string());
            }
        }

        children
    }

    /// `prefix` 配下の全キーを、プレフィックスを除いた綴りで返す
    pub fn section(&self, prefix: &str) -> BTreeMap<String, ConfigValue> {
        let prefix = format!("{}.", normalize(prefix));
        self.entries
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, e)| (e.key[prefix.len()..].to_string(), e.value.clone()))
            .collect()
    }
}

fn normalize(key: &str) -> String {
    key.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(pairs: &[(&str, ConfigValue)]) -> ConfigTree {
        let mut tree = ConfigTree::new();
        for (k, v) in pairs {
            tree.set(k, v.clone());
        }
        tree
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let tree = tree(&[("Database.Port", ConfigValue::from("3306"))]);
        assert_eq!(tree.require::<u16>("database.port").unwrap(), 3306);
        assert!(tree.contains("DATABASE.PORT"));
    }

    #[test]
    fn test_overwrite_keeps_first_spelling() {
        let mut tree = tree(&[("services.web.environment.API_URL", ConfigValue::from("a"))]);
        tree.set("services.web.environment.api_url", ConfigValue::from("b"));

        let section = tree.section("services.web.environment");
        assert_eq!(section.len(), 1);
        assert_eq!(section.get("API_URL"), Some(&ConfigValue::from("b")));
    }

    #[test]
    fn test_missing_key_is_named() {
        let tree = ConfigTree::new();
        let err = tree.require::<String>("dns.domain_name").unwrap_err();
        assert_eq!(err.key(), Some("dns.domain_name"));
        assert!(matches!(err, ConfigError::MissingKey(_)));
    }

    #[test]
    fn test_invalid_value() {
        let tree = tree(&[("database.port", ConfigValue::from("not-a-port"))]);
        let err = tree.require::<u16>("database.port").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_bool_from_string() {
        let tree = tree(&[("database.storage_encrypted", ConfigValue::from("False"))]);
        assert!(!tree.require::<bool>("database.storage_encrypted").unwrap());
    }

    #[test]
    fn test_children_sorted_and_unique() {
        let tree = tree(&[
            ("services.web.image", ConfigValue::from("nginx")),
            ("services.api.image", ConfigValue::from("api")),
            ("services.api.desired_count", ConfigValue::from("2")),
        ]);
        assert_eq!(tree.children("services"), vec!["api", "web"]);
    }

    #[test]
    fn test_remove_clears_subtree() {
        let mut tree = tree(&[
            ("database.port", ConfigValue::from("3306")),
            ("database.backup.window", ConfigValue::from("01:00-02:00")),
            ("dns.domain_name", ConfigValue::from("example.com")),
        ]);
        tree.remove("database");
        assert_eq!(tree.len(), 1);
        assert!(tree.contains("dns.domain_name"));
    }
}
