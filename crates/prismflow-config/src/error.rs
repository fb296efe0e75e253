use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "設定 `{0}` がありません。NUTANIX_* 環境変数を設定するか、\
        prismflow.yaml (または PRISMFLOW_CONFIG_PATH で指定したファイル) に追加してください"
    )]
    Missing(&'static str),

    #[error("{key} の値 {value:?} が不正です")]
    InvalidValue { key: &'static str, value: String },

    #[error("{} の解析に失敗しました: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
