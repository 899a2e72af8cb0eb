//! 統合ローダー
//!
//! プロジェクト検出、設定の読み込み、型付き設定の検証、グラフ構築を統合

use crate::builder::build_graph;
use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::settings::StackSettings;
use std::path::{Path, PathBuf};
use stratus_config::{BASE_FILE, ConfigError, ConfigLoader, ConfigTree};
use tracing::{debug, info, instrument, warn};

/// 読み込み済みのスタック
#[derive(Debug, Clone)]
pub struct Stack {
    pub environment: String,
    pub tree: ConfigTree,
    pub settings: StackSettings,
    pub graph: ResourceGraph,
}

impl Stack {
    pub fn stack_id(&self) -> String {
        self.settings.stack_id()
    }
}

/// プロジェクトルートを検出
///
/// カレントディレクトリから上に向かって stratus.json（または .stratus/stratus.json）を探す。
pub fn find_project_root() -> Result<PathBuf> {
    let start_dir = std::env::current_dir().map_err(ConfigError::from)?;
    let mut current = start_dir.clone();
    debug!(start_dir = %start_dir.display(), "Searching for project root");

    loop {
        if current.join(BASE_FILE).exists() {
            info!(project_root = %current.display(), "Found project root");
            return Ok(current);
        }
        if current.join(".stratus").join(BASE_FILE).exists() {
            let root = current.join(".stratus");
            info!(project_root = %root.display(), "Found project root (.stratus)");
            return Ok(root);
        }
        if !current.pop() {
            break;
        }
    }

    warn!(start_dir = %start_dir.display(), "Project root not found");
    Err(ConfigError::ConfigFileNotFound.into())
}

/// 指定ディレクトリからスタックを読み込む
///
/// 読み込み順序: stratus.json → stratus.{environment}.json → stratus.local.json → STRATUS_* 環境変数
#[instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn load_stack_from_root(project_root: &Path, environment: &str) -> Result<Stack> {
    debug!("Step 1: Loading configuration sources");
    let tree = ConfigLoader::for_project(project_root, environment).load()?;
    build_stack(tree, environment)
}

/// 解決済みの設定ツリーからスタックを構築
#[instrument(skip(tree))]
pub fn build_stack(tree: ConfigTree, environment: &str) -> Result<Stack> {
    debug!("Step 2: Parsing typed settings");
    let settings = StackSettings::from_tree(&tree, environment)?;

    debug!("Step 3: Building resource graph");
    let graph = build_graph(&settings)?;

    info!(
        stack = %settings.stack_id(),
        nodes = graph.len(),
        sources = tree.sources().len(),
        "Stack loaded successfully"
    );

    Ok(Stack {
        environment: environment.to_string(),
        tree,
        settings,
        graph,
    })
}
