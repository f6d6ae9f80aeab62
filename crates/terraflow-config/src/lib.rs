pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{PROJECT_DIR, RetrySettings, Settings};

use std::path::PathBuf;

/// 環境変数でプロジェクトファイルを直接指定する
pub const ENV_CONFIG_PATH: &str = "TERRAFLOW_CONFIG_PATH";

/// TerraFlowの設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("terraflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// プロジェクトファイル (terraflow.yaml) を探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 TERRAFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: terraflow.local.yaml, terraflow.yaml
/// 3. ./.terraflow/ ディレクトリ内: 同様の順序
pub fn find_project_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(config_path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    let candidates = ["terraflow.local.yaml", "terraflow.yaml"];

    // 2. カレントディレクトリで検索
    for filename in &candidates {
        let path = current_dir.join(filename);
        if path.is_file() {
            return Ok(path);
        }
    }

    // 3. ./.terraflow/ ディレクトリで検索
    let project_dir = current_dir.join(PROJECT_DIR);
    if project_dir.is_dir() {
        for filename in &candidates {
            let path = project_dir.join(filename);
            if path.is_file() {
                return Ok(path);
            }
        }
    }

    Err(ConfigError::ProjectFileNotFound)
}
