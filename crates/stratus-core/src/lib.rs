//! Stratus のリソースグラフ
//!
//! 設定ツリーから型付きのスタック設定を読み出し、依存関係付きのリソースグラフを構築します。

pub mod builder;
pub mod error;
pub mod graph;
pub mod loader;
pub mod model;
pub mod settings;

pub use builder::{GraphBuilder, build_graph, names};
pub use error::*;
pub use graph::ResourceGraph;
pub use loader::{Stack, build_stack, find_project_root, load_stack_from_root};
pub use model::*;
pub use settings::{
    DatabaseSettings, NetworkSettings, SecretSettings, ServiceSecretSettings, ServiceSettings,
    StackSettings,
};
