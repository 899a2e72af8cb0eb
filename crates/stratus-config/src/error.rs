use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: stratus.json\n\
        - ./.stratus/ ディレクトリ\n\
        - ~/.config/stratus/stratus.json\n\
        または STRATUS_CONFIG_PATH 環境変数で直接指定できます"
    )]
    ConfigFileNotFound,

    #[error("必須の設定ファイルが見つかりません: {0}")]
    SourceNotFound(PathBuf),

    #[error("設定ソースを解析できません: {origin}\n理由: {message}")]
    Malformed { origin: String, message: String },

    #[error("必須の設定キーがありません: {0}")]
    MissingKey(String),

    #[error("設定値が不正です: {key} ({expected} を期待しましたが '{found}' でした)")]
    InvalidValue {
        key: String,
        expected: String,
        found: String,
    },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// エラーの原因となった設定キー（あれば）
    pub fn key(&self) -> Option<&str> {
        match self {
            ConfigError::MissingKey(key) => Some(key),
            ConfigError::InvalidValue { key, .. } => Some(key),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
