//! Stratus の設定読み込み
//!
//! ベース設定ファイル・環境別オーバーレイ・環境変数を順にマージし、
//! ドット区切りキーの [`ConfigTree`] を生成する。

pub mod error;
pub mod loader;
pub mod tree;

pub use error::*;
pub use loader::{
    BASE_FILE, CONFIG_PATH_VAR, ConfigLoader, ConfigSource, DEFAULT_ENVIRONMENT, ENV_NAME_VAR,
    ENV_PREFIX, LOCAL_FILE, environment_name,
};
pub use tree::{ConfigTree, ConfigValue, FromConfigValue};

use std::path::PathBuf;

/// ユーザー設定ディレクトリ (~/.config/stratus) のパスを取得
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stratus"))
}

/// ベース設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 STRATUS_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: stratus.json
/// 3. ./.stratus/ ディレクトリ内: stratus.json
/// 4. ~/.config/stratus/stratus.json (グローバル設定)
pub fn find_config_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_PATH_VAR) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリ
    let path = current_dir.join(BASE_FILE);
    if path.exists() {
        return Ok(path);
    }

    // 3. ./.stratus/ ディレクトリ
    let path = current_dir.join(".stratus").join(BASE_FILE);
    if path.exists() {
        return Ok(path);
    }

    // 4. グローバル設定
    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join(BASE_FILE);
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("stratus"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("stratus.json"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(CONFIG_PATH_VAR, find_config_file);

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with("stratus.json"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_dot_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let dot_dir = temp_dir.path().join(".stratus");
        fs::create_dir(&dot_dir).unwrap();
        fs::write(dot_dir.join("stratus.json"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(CONFIG_PATH_VAR, find_config_file);

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".stratus/stratus.json"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.json");
        fs::write(&config_path, "{}").unwrap();

        let result = temp_env::with_var(
            CONFIG_PATH_VAR,
            Some(config_path.to_str().unwrap()),
            find_config_file,
        );
        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    #[serial]
    fn test_find_config_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        // グローバル設定の影響を受けないよう HOME/XDG も一時ディレクトリに向ける
        let home = temp_dir.path().to_str().unwrap().to_string();
        let result = temp_env::with_vars(
            [
                (CONFIG_PATH_VAR, None),
                ("HOME", Some(home.as_str())),
                ("XDG_CONFIG_HOME", Some(home.as_str())),
            ],
            find_config_file,
        );

        std::env::set_current_dir(original_dir).unwrap();
        assert!(matches!(result, Err(ConfigError::ConfigFileNotFound)));
    }
}
