pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prism Central の既定 HTTPS ポート
pub const DEFAULT_PORT: u16 = 9440;

/// 設定ファイルを直接指定する環境変数
pub const CONFIG_PATH_ENV: &str = "PRISMFLOW_CONFIG_PATH";

const ENV_ENDPOINT: &str = "NUTANIX_ENDPOINT";
const ENV_PORT: &str = "NUTANIX_PORT";
const ENV_USERNAME: &str = "NUTANIX_USERNAME";
const ENV_PASSWORD: &str = "NUTANIX_PASSWORD";
const ENV_INSECURE: &str = "NUTANIX_INSECURE";
const ENV_WAIT_TIMEOUT: &str = "NUTANIX_WAIT_TIMEOUT";
const ENV_PROXY_URL: &str = "NUTANIX_PROXY_URL";

/// Prism Central 1台分の接続設定
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// ホスト名またはアドレス (スキーム・ポートなし)
    pub endpoint: String,
    pub port: u16,
    pub username: String,
    pub password: String,

    /// 自己署名証明書を受け入れる
    pub insecure: bool,

    /// VM 待機の上限 (分)
    pub wait_timeout: Option<u64>,

    pub proxy_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: password.into(),
            insecure: false,
            wait_timeout: None,
            proxy_url: None,
        }
    }

    /// v3 API のルート (例: `https://pc.example.com:9440/api/nutanix/v3`)
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api/nutanix/v3", self.endpoint, self.port)
    }

    /// `NUTANIX_*` 環境変数のみから設定を読み込む
    pub fn from_env() -> Result<Self> {
        FileConfig::default().resolve()
    }

    /// YAML ファイルから読み込み、環境変数で上書きする
    pub fn from_file(path: &Path) -> Result<Self> {
        FileConfig::read(path)?.resolve()
    }

    /// 最初に見つかった設定ファイルから読み込み、環境変数で上書きする
    ///
    /// ファイルが無くてもエラーにはしない
    pub fn load() -> Result<Self> {
        match find_config_file()? {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading provider config");
                Self::from_file(&path)
            }
            None => Self::from_env(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("insecure", &self.insecure)
            .field("wait_timeout", &self.wait_timeout)
            .field("proxy_url", &self.proxy_url)
            .finish()
    }
}

/// ファイル上の形式。環境変数で補えるよう全キーを省略可能にする
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    endpoint: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    insecure: Option<bool>,
    wait_timeout: Option<u64>,
    proxy_url: Option<String>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    fn resolve(self) -> Result<ProviderConfig> {
        let endpoint = env_string(ENV_ENDPOINT)
            .or(self.endpoint)
            .ok_or(ConfigError::Missing("endpoint"))?;
        let username = env_string(ENV_USERNAME)
            .or(self.username)
            .ok_or(ConfigError::Missing("username"))?;
        let password = env_string(ENV_PASSWORD)
            .or(self.password)
            .ok_or(ConfigError::Missing("password"))?;

        Ok(ProviderConfig {
            endpoint,
            port: env_parsed(ENV_PORT)?.or(self.port).unwrap_or(DEFAULT_PORT),
            username,
            password,
            insecure: env_bool(ENV_INSECURE)?.or(self.insecure).unwrap_or(false),
            wait_timeout: env_parsed(ENV_WAIT_TIMEOUT)?.or(self.wait_timeout),
            proxy_url: env_string(ENV_PROXY_URL).or(self.proxy_url),
        })
    }
}

/// 設定済みかつ空でない場合のみ
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: FromStr>(key: &'static str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}

fn env_bool(key: &'static str) -> Result<Option<bool>> {
    match env_string(key) {
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue { key, value }),
        },
        None => Ok(None),
    }
}

/// プロバイダ設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 PRISMFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: prismflow.yaml
/// 3. ./.prismflow/config.yaml
/// 4. ~/.config/prismflow/config.yaml (グローバル設定)
pub fn find_config_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    // 2, 3. カレントディレクトリ
    let current_dir = std::env::current_dir()?;
    let candidates = [
        current_dir.join("prismflow.yaml"),
        current_dir.join(".prismflow").join("config.yaml"),
    ];
    if let Some(path) = candidates.into_iter().find(|p| p.exists()) {
        return Ok(Some(path));
    }

    // 4. グローバル設定
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("prismflow").join("config.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    const CLEAR: [(&str, Option<&str>); 8] = [
        (ENV_ENDPOINT, None),
        (ENV_PORT, None),
        (ENV_USERNAME, None),
        (ENV_PASSWORD, None),
        (ENV_INSECURE, None),
        (ENV_WAIT_TIMEOUT, None),
        (ENV_PROXY_URL, None),
        (CONFIG_PATH_ENV, None),
    ];

    fn with_env<F: FnOnce()>(vars: &[(&str, Option<&str>)], f: F) {
        let mut all: Vec<(&str, Option<&str>)> = CLEAR
            .iter()
            .filter(|(key, _)| !vars.iter().any(|(k, _)| k == key))
            .copied()
            .collect();
        all.extend_from_slice(vars);
        temp_env::with_vars(all, f);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        with_env(
            &[
                (ENV_ENDPOINT, Some("pc.example.com")),
                (ENV_USERNAME, Some("admin")),
                (ENV_PASSWORD, Some("secret")),
                (ENV_INSECURE, Some("true")),
                (ENV_WAIT_TIMEOUT, Some("5")),
            ],
            || {
                let config = ProviderConfig::from_env().unwrap();
                assert_eq!(config.endpoint, "pc.example.com");
                assert_eq!(config.port, DEFAULT_PORT);
                assert!(config.insecure);
                assert_eq!(config.wait_timeout, Some(5));
                assert_eq!(
                    config.base_url(),
                    "https://pc.example.com:9440/api/nutanix/v3"
                );
            },
        );
    }

    #[test]
    #[serial]
    fn test_missing_password() {
        with_env(
            &[
                (ENV_ENDPOINT, Some("pc.example.com")),
                (ENV_USERNAME, Some("admin")),
            ],
            || {
                let err = ProviderConfig::from_env().unwrap_err();
                assert!(matches!(err, ConfigError::Missing("password")));
            },
        );
    }

    #[test]
    #[serial]
    fn test_invalid_port() {
        with_env(
            &[
                (ENV_ENDPOINT, Some("pc")),
                (ENV_USERNAME, Some("admin")),
                (ENV_PASSWORD, Some("secret")),
                (ENV_PORT, Some("http")),
            ],
            || {
                let err = ProviderConfig::from_env().unwrap_err();
                assert!(matches!(err, ConfigError::InvalidValue { key: "NUTANIX_PORT", .. }));
            },
        );
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pc.yaml");
        fs::write(
            &path,
            "endpoint: pc-file\nport: 443\nusername: file-user\npassword: file-pass\n",
        )
        .unwrap();

        with_env(&[(ENV_USERNAME, Some("env-user"))], || {
            let config = ProviderConfig::from_file(&path).unwrap();
            assert_eq!(config.endpoint, "pc-file");
            assert_eq!(config.port, 443);
            assert_eq!(config.username, "env-user");
            assert_eq!(config.password, "file-pass");
        });
    }

    #[test]
    #[serial]
    fn test_unknown_key_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("pc.yaml");
        fs::write(&path, "endpoint: pc\nwait_timout: 5\n").unwrap();

        with_env(&[], || {
            let err = ProviderConfig::from_file(&path).unwrap_err();
            assert!(matches!(err, ConfigError::Yaml { .. }));
        });
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        fs::write(temp_dir.path().join("prismflow.yaml"), "endpoint: pc\n").unwrap();
        let nested = temp_dir.path().join(".prismflow");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("config.yaml"), "endpoint: nested\n").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        with_env(&[], || {
            let found = find_config_file().unwrap().unwrap();
            assert!(found.ends_with("prismflow.yaml"));
        });
        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom.yaml");
        fs::write(&path, "endpoint: pc\n").unwrap();
        let path_str = path.to_str().unwrap();

        with_env(&[(CONFIG_PATH_ENV, Some(path_str))], || {
            assert_eq!(find_config_file().unwrap(), Some(path.clone()));
        });
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ProviderConfig::new("pc", "admin", "hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
