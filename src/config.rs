//! 应用配置模块
//!
//! 配置只在 `main` 中加载一次，之后以值的形式传给各组件。

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.put.io/v2";
pub const DEFAULT_UPLOAD_URL: &str = "https://upload.put.io/v2";

/// 远程服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// put.io 应用 client id
    #[serde(default)]
    pub client_id: Option<String>,
    /// REST API 地址
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// 上传接口地址
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    /// 授权服务地址（回调、令牌中转）
    #[serde(default)]
    pub auth_url: Option<String>,
    /// 授权轮询间隔（秒）
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_upload_url() -> String {
    DEFAULT_UPLOAD_URL.to_string()
}

fn default_poll_interval() -> u64 {
    3
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            api_url: default_api_url(),
            upload_url: default_upload_url(),
            auth_url: None,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl RemoteConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// 应用配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    /// 已保存（或环境变量提供）的访问令牌
    pub access_token: Option<String>,
    pub config_dir: PathBuf,
}

impl AppConfig {
    /// 从 config.json 和环境变量加载，环境变量优先
    pub fn load(config_dir: &Path) -> Self {
        let file = read_config_file(config_dir);
        Self::from_sources(config_dir, file, |key| std::env::var(key).ok())
    }

    /// 合并文件配置和环境变量
    pub fn from_sources(
        config_dir: &Path,
        file: Option<serde_json::Value>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut remote = file
            .as_ref()
            .and_then(|v| v.get("remote"))
            .and_then(|v| serde_json::from_value::<RemoteConfig>(v.clone()).ok())
            .unwrap_or_default();
        let mut access_token = file
            .as_ref()
            .and_then(|v| v.get("accessToken"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = env("PUTIO_CLIENT_ID") {
            remote.client_id = Some(v);
        }
        if let Some(v) = env("PUTIO_API_URL") {
            remote.api_url = v;
        }
        if let Some(v) = env("PUTIO_UPLOAD_URL") {
            remote.upload_url = v;
        }
        if let Some(v) = env("PUTIO_AUTH_URL") {
            remote.auth_url = Some(v);
        }
        if let Some(v) = env("PUTIO_POLL_INTERVAL").and_then(|v| v.parse().ok()) {
            remote.poll_interval_secs = v;
        }
        if let Some(v) = env("PUTIO_ACCESS_TOKEN") {
            access_token = Some(v);
        }

        Self {
            remote,
            access_token,
            config_dir: config_dir.to_path_buf(),
        }
    }

    /// 保存访问令牌，保留 config.json 中的其他配置
    pub fn save_token(&self, token: &str) -> io::Result<()> {
        fs::create_dir_all(&self.config_dir)?;
        let config_file = self.config_dir.join("config.json");

        let mut config = read_config_file(&self.config_dir).unwrap_or_else(|| serde_json::json!({}));
        config["accessToken"] = serde_json::Value::String(token.to_string());

        let content = serde_json::to_string_pretty(&config)?;
        fs::write(&config_file, content)
    }
}

/// 读取 config.json，不存在或损坏时返回 None
pub fn read_config_file(config_dir: &Path) -> Option<serde_json::Value> {
    let content = fs::read_to_string(config_dir.join("config.json")).ok()?;
    serde_json::from_str::<serde_json::Value>(&content)
        .ok()
        .filter(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_file() {
        let file = serde_json::json!({
            "remote": { "clientId": "from-file", "authUrl": "https://auth.example" },
            "accessToken": "file-token"
        });
        let config = AppConfig::from_sources(Path::new("/tmp/x"), Some(file), |key| match key {
            "PUTIO_CLIENT_ID" => Some("from-env".to_string()),
            "PUTIO_POLL_INTERVAL" => Some("7".to_string()),
            _ => None,
        });

        assert_eq!(config.remote.client_id.as_deref(), Some("from-env"));
        assert_eq!(config.remote.auth_url.as_deref(), Some("https://auth.example"));
        assert_eq!(config.remote.poll_interval_secs, 7);
        assert_eq!(config.remote.api_url, DEFAULT_API_URL);
        assert_eq!(config.access_token.as_deref(), Some("file-token"));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let config = AppConfig::from_sources(Path::new("/tmp/x"), None, |key| match key {
            "PUTIO_ACCESS_TOKEN" => Some("  ".to_string()),
            _ => None,
        });
        assert!(config.access_token.is_none());
        assert_eq!(config.remote.poll_interval(), Duration::from_secs(3));
    }

    #[test]
    fn save_token_keeps_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"log": {"level": "debug"}}"#,
        )
        .unwrap();

        let config = AppConfig::from_sources(dir.path(), None, |_| None);
        config.save_token("abc").unwrap();

        let saved = read_config_file(dir.path()).unwrap();
        assert_eq!(saved["accessToken"], "abc");
        assert_eq!(saved["log"]["level"], "debug");

        let reloaded = AppConfig::from_sources(dir.path(), Some(saved), |_| None);
        assert_eq!(reloaded.access_token.as_deref(), Some("abc"));
    }
}
