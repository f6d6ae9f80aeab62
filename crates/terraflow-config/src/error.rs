use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "プロジェクトファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: terraflow.local.yaml, terraflow.yaml\n\
        - ./.terraflow/ ディレクトリ\n\
        または TERRAFLOW_CONFIG_PATH 環境変数で直接指定できます"
    )]
    ProjectFileNotFound,

    #[error("設定値が不正です ({key}): {message}")]
    InvalidSetting { key: String, message: String },

    #[error("設定ファイルの解析に失敗しました: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
