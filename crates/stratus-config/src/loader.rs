//! 設定ソースのレイヤー合成
//!
//! 読み込み順序: stratus.json → stratus.{env}.json → stratus.local.json → 環境変数
//! 後のソースが同じキーを上書きする。

use crate::error::{ConfigError, Result};
use crate::tree::{ConfigTree, ConfigValue};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// 環境変数オーバーライドのプレフィックス
pub const ENV_PREFIX: &str = "STRATUS_";

/// 環境名を選択する環境変数
pub const ENV_NAME_VAR: &str = "STRATUS_ENV";

/// ベース設定ファイルを直接指定する環境変数
pub const CONFIG_PATH_VAR: &str = "STRATUS_CONFIG_PATH";

/// 環境名が指定されなかった場合のデフォルト
pub const DEFAULT_ENVIRONMENT: &str = "staging";

/// ベース設定ファイル名
pub const BASE_FILE: &str = "stratus.json";

/// ローカルオーバーライドファイル名
pub const LOCAL_FILE: &str = "stratus.local.json";

/// 環境変数キーのパス区切り（`STRATUS_DATABASE__PORT` → `database.port`）
const ENV_SEPARATOR: &str = "__";

/// 配下のキーを綴りのまま取り込むセクション（コンテナの環境変数名は大文字小文字を区別する）
const VERBATIM_SECTION: &str = "environment";

/// キーとして取り込まない予約済み環境変数
const RESERVED_VARS: &[&str] = &[ENV_NAME_VAR, CONFIG_PATH_VAR];

/// 設定ソース
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// JSON ファイル
    File { path: PathBuf, required: bool },

    /// メモリ上の JSON ドキュメント（デフォルト値・テスト用）
    Json {
        name: String,
        value: serde_json::Value,
    },

    /// プレフィックス付き環境変数
    Environment {
        prefix: String,
        vars: Vec<(String, String)>,
    },
}

impl ConfigSource {
    /// 表示用のソース名
    pub fn name(&self) -> String {
        match self {
            ConfigSource::File { path, .. } => path.display().to_string(),
            ConfigSource::Json { name, .. } => name.clone(),
            ConfigSource::Environment { prefix, .. } => format!("env:{}*", prefix),
        }
    }
}

/// 設定ローダー
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// プロジェクトディレクトリと環境名から標準のレイヤー構成を作る
    pub fn for_project(project_root: &Path, environment: &str) -> Self {
        let base = std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| project_root.join(BASE_FILE));

        Self::new()
            .file(base)
            .optional_file(project_root.join(format!("stratus.{}.json", environment)))
            .optional_file(project_root.join(LOCAL_FILE))
            .process_environment(ENV_PREFIX)
    }

    pub fn source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// 必須ファイル
    pub fn file(self, path: impl Into<PathBuf>) -> Self {
        self.source(ConfigSource::File {
            path: path.into(),
            required: true,
        })
    }

    /// 任意ファイル（存在しなければスキップ）
    pub fn optional_file(self, path: impl Into<PathBuf>) -> Self {
        self.source(ConfigSource::File {
            path: path.into(),
            required: false,
        })
    }

    pub fn json(self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.source(ConfigSource::Json {
            name: name.into(),
            value,
        })
    }

    /// 与えられた変数一覧からプレフィックス付きのものを取り込む
    pub fn environment<I, K, V>(self, prefix: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.source(ConfigSource::Environment {
            prefix: prefix.into(),
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        })
    }

    /// プロセス環境変数のスナップショットを取り込む
    pub fn process_environment(self, prefix: impl Into<String>) -> Self {
        self.environment(prefix, std::env::vars())
    }

    pub fn sources(&self) -> &[ConfigSource] {
        &self.sources
    }

    /// 全ソースを順にマージして設定ツリーを生成
    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub fn load(&self) -> Result<ConfigTree> {
        let mut tree = ConfigTree::new();

        for source in &self.sources {
            match source {
                ConfigSource::File { path, required } => {
                    if !path.exists() {
                        if *required {
                            return Err(ConfigError::SourceNotFound(path.clone()));
                        }
                        debug!(path = %path.display(), "Optional config file not found, skipping");
                        continue;
                    }
                    let content = std::fs::read_to_string(path)?;
                    let value: serde_json::Value =
                        serde_json::from_str(&content).map_err(|e| ConfigError::Malformed {
                            origin: path.display().to_string(),
                            message: e.to_string(),
                        })?;
                    merge_document(&mut tree, &source.name(), &value)?;
                }
                ConfigSource::Json { value, .. } => {
                    merge_document(&mut tree, &source.name(), value)?;
                }
                ConfigSource::Environment { prefix, vars } => {
                    let applied = merge_environment(&mut tree, prefix, vars);
                    debug!(prefix = %prefix, applied, "Applied environment overrides");
                }
            }
            tree.record_source(source.name());
        }

        info!(keys = tree.len(), "Configuration resolved");
        Ok(tree)
    }
}

/// 環境名を決定（明示指定 → STRATUS_ENV → staging）
pub fn environment_name(explicit: Option<&str>) -> String {
    explicit
        .map(|s| s.to_string())
        .or_else(|| std::env::var(ENV_NAME_VAR).ok())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

fn merge_document(tree: &mut ConfigTree, origin: &str, value: &serde_json::Value) -> Result<()> {
    if !value.is_object() {
        return Err(ConfigError::Malformed {
            origin: origin.to_string(),
            message: "トップレベルはオブジェクトである必要があります".to_string(),
        });
    }
    flatten(tree, "", value);
    Ok(())
}

fn flatten(tree: &mut ConfigTree, prefix: &str, value: &serde_json::Value) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };

    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                flatten(tree, &join(key), child);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(tree, &join(&index.to_string()), child);
            }
        }
        serde_json::Value::Null => tree.remove(prefix),
        scalar => {
            if let Some(v) = ConfigValue::from_json(scalar) {
                tree.set(prefix, v);
            }
        }
    }
}

fn merge_environment(tree: &mut ConfigTree, prefix: &str, vars: &[(String, String)]) -> usize {
    let mut applied = 0;
    for (name, value) in vars {
        if RESERVED_VARS.contains(&name.as_str()) {
            continue;
        }
        let Some(rest) = name.strip_prefix(prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let mut verbatim = false;
        let key = rest
            .split(ENV_SEPARATOR)
            .map(|segment| {
                if verbatim {
                    return segment.to_string();
                }
                let segment = segment.to_ascii_lowercase();
                verbatim = segment == VERBATIM_SECTION;
                segment
            })
            .collect::<Vec<_>>()
            .join(".");
        tree.set(&key, ConfigValue::String(value.clone()));
        applied += 1;
    }
    applied
}
