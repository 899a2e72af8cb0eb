//! シークレットリソース
//!
//! 値そのものはプロバイダーが apply 時に生成し、グラフには生成パラメータだけを持つ。

use super::reference::Reference;
use serde::{Deserialize, Serialize};

/// デフォルトのパスワード長
pub const DEFAULT_SECRET_LENGTH: u32 = 30;

/// デフォルトの除外文字（接続文字列で問題になる文字）
pub const DEFAULT_EXCLUDE_CHARACTERS: &str = "/@\"";

/// 生成シークレット
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    /// プロバイダー上のシークレット名
    pub secret_name: String,
    /// 生成する文字数
    pub length: u32,
    /// 生成時に除外する文字
    pub exclude_characters: String,
    /// 空白を含めるか
    pub include_space: bool,
}

impl SecretSpec {
    pub fn new(secret_name: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
            length: DEFAULT_SECRET_LENGTH,
            exclude_characters: DEFAULT_EXCLUDE_CHARACTERS.to_string(),
            include_space: false,
        }
    }

    pub fn references(&self) -> Vec<&Reference> {
        Vec::new()
    }
}
