use stratus_config::ConfigError;
use thiserror::Error;

/// グラフ構築・検証エラー
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("ノード名が重複しています: {0}")]
    DuplicateNode(String),

    #[error("ノード '{node}' が未構築のノード '{target}' を参照しています")]
    UnresolvedReference { node: String, target: String },

    #[error("ノード '{0}' が自分自身を参照しています")]
    SelfReference(String),

    #[error("循環依存が検出されました: {0}")]
    CircularDependency(String),

    #[error("ノードが見つかりません: {0}")]
    NodeNotFound(String),
}

/// スタック構築エラー（設定エラーまたはグラフエラー）
#[derive(Error, Debug)]
pub enum StackError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, StackError>;
