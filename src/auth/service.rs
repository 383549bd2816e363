//! 授权服务一侧的处理逻辑
//!
//! 只包含请求处理本身，不负责 HTTP 监听。回调拿到授权码后换取令牌，以会话
//! id 为键写入 [`TokenStore`]，有效期 [`SESSION_TTL`]。

use super::store::TokenStore;
use super::SESSION_TTL;
use crate::config::DEFAULT_API_URL;
use crate::error::{AuthError, RemoteError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 授权服务配置
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_url: String,
    /// 服务自身的公开地址，回调地址为 `{base_url}/oauth-callback`
    pub base_url: String,
}

impl ServiceConfig {
    pub fn new(client_id: &str, client_secret: &str, base_url: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// 从环境变量读取: PUTIO_CLIENT_ID, PUTIO_CLIENT_SECRET, PUTIO_AUTH_URL, PUTIO_API_URL
    pub fn from_env() -> Result<Self, AuthError> {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let missing = |key: &str| AuthError::Configuration(format!("缺少环境变量 {}", key));

        let client_id = var("PUTIO_CLIENT_ID").ok_or_else(|| missing("PUTIO_CLIENT_ID"))?;
        let client_secret = var("PUTIO_CLIENT_SECRET").ok_or_else(|| missing("PUTIO_CLIENT_SECRET"))?;
        let base_url = var("PUTIO_AUTH_URL").ok_or_else(|| missing("PUTIO_AUTH_URL"))?;

        let mut config = Self::new(&client_id, &client_secret, &base_url);
        if let Some(api_url) = var("PUTIO_API_URL") {
            config.api_url = api_url.trim_end_matches('/').to_string();
        }
        Ok(config)
    }

    pub fn redirect_uri(&self) -> String {
        format!("{}/oauth-callback", self.base_url)
    }
}

/// 向 put.io 换取令牌
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// 授权码换令牌
    async fn exchange_code(&self, code: &str) -> Result<String, AuthError>;

    /// 用户名密码换令牌
    async fn exchange_credentials(&self, username: &str, password: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

/// put.io OAuth 接口
pub struct PutioOAuth {
    http: Client,
    config: ServiceConfig,
}

impl PutioOAuth {
    pub fn new(config: ServiceConfig) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }

    async fn read_token(response: reqwest::Response) -> Result<String, AuthError> {
        match response.status() {
            status if status.is_success() => {
                let body: AccessTokenResponse = response.json().await?;
                Ok(body.access_token)
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AuthError::InvalidCredentials)
            }
            status => Err(RemoteError::Api {
                status: status.as_u16(),
                error_type: "OAUTH".to_string(),
                message: response.text().await.unwrap_or_default(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl TokenExchange for PutioOAuth {
    async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        let response = self
            .http
            .get(format!("{}/oauth2/access_token", self.config.api_url))
            .query(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri().as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
            ])
            .send()
            .await?;
        Self::read_token(response).await
    }

    async fn exchange_credentials(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let response = self
            .http
            .put(format!(
                "{}/oauth2/authorizations/clients/{}/",
                self.config.api_url, self.config.client_id
            ))
            .basic_auth(username, Some(password))
            .form(&[("client_secret", self.config.client_secret.as_str())])
            .send()
            .await?;
        Self::read_token(response).await
    }
}

/// 授权服务
pub struct AuthorizationService {
    store: Arc<dyn TokenStore>,
    exchange: Arc<dyn TokenExchange>,
}

impl AuthorizationService {
    pub fn new(store: Arc<dyn TokenStore>, exchange: Arc<dyn TokenExchange>) -> Self {
        Self { store, exchange }
    }

    /// 处理 `/oauth-callback?state=..&code=..`
    ///
    /// 换到的令牌按 `state` 写入存储，返回给浏览器展示的提示文字。
    pub async fn handle_callback(
        &self,
        state: Option<&str>,
        code: Option<&str>,
    ) -> Result<String, AuthError> {
        let state = non_empty(state).ok_or(AuthError::MissingParameter("state"))?;
        let code = non_empty(code).ok_or(AuthError::MissingParameter("code"))?;

        let token = self.exchange.exchange_code(code).await?;
        self.store.put(state, &token, SESSION_TTL).await?;

        info!(session = %state, "授权回调完成");
        Ok("授权成功，现在可以关闭此页面并回到命令行".to_string())
    }

    /// 处理 `/get-access-token?state=..`，未授权或已过期时返回 None
    pub async fn fetch_token(&self, state: Option<&str>) -> Result<Option<String>, AuthError> {
        let state = non_empty(state).ok_or(AuthError::MissingParameter("state"))?;
        self.store.get(state).await
    }

    /// 处理 `POST /create-access-token`
    pub async fn create_access_token(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<String, AuthError> {
        let username = non_empty(username).ok_or(AuthError::MissingParameter("username"))?;
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or(AuthError::MissingParameter("password"))?;

        self.exchange
            .exchange_credentials(username, password)
            .await
            .inspect_err(|e| warn!("用户名密码换取令牌失败: {}", e))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::presenter::UrlPresenter;
    use crate::auth::session::{AuthApi, SessionManager};
    use crate::auth::MemoryTokenStore;
    use crate::config::RemoteConfig;
    use reqwest::Url;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakeExchange {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenExchange for FakeExchange {
        async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match code {
                "good" => Ok("token-from-code".into()),
                _ => Err(AuthError::InvalidCredentials),
            }
        }

        async fn exchange_credentials(&self, username: &str, password: &str) -> Result<String, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match (username, password) {
                ("bob", "pw") => Ok("token-from-password".into()),
                _ => Err(AuthError::InvalidCredentials),
            }
        }
    }

    fn service() -> (AuthorizationService, Arc<MemoryTokenStore>, Arc<FakeExchange>) {
        let store = Arc::new(MemoryTokenStore::new());
        let exchange = Arc::new(FakeExchange::default());
        (
            AuthorizationService::new(store.clone(), exchange.clone()),
            store,
            exchange,
        )
    }

    #[tokio::test]
    async fn callback_stores_token_under_state() {
        let (service, store, _) = service();

        service.handle_callback(Some("s1"), Some("good")).await.unwrap();

        assert_eq!(store.get("s1").await.unwrap().as_deref(), Some("token-from-code"));
        assert_eq!(
            service.fetch_token(Some("s1")).await.unwrap().as_deref(),
            Some("token-from-code")
        );
        // 读取不会删除条目
        assert!(service.fetch_token(Some("s1")).await.unwrap().is_some());
        assert_eq!(service.fetch_token(Some("other")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_parameters_are_rejected_before_exchange() {
        let (service, _, exchange) = service();

        let err = service.handle_callback(None, Some("good")).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingParameter("state")));
        let err = service.handle_callback(Some("s"), Some(" ")).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingParameter("code")));
        let err = service.fetch_token(None).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingParameter("state")));
        let err = service.create_access_token(Some("bob"), None).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingParameter("password")));

        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_code_exchange_stores_nothing() {
        let (service, store, _) = service();

        assert!(service.handle_callback(Some("s"), Some("bad")).await.is_err());
        assert_eq!(store.get("s").await.unwrap(), None);
    }

    #[tokio::test]
    async fn credentials_are_exchanged() {
        let (service, _, _) = service();
        assert_eq!(
            service.create_access_token(Some("bob"), Some("pw")).await.unwrap(),
            "token-from-password"
        );
        assert!(matches!(
            service.create_access_token(Some("bob"), Some("nope")).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn redirect_uri_uses_base_url() {
        let config = ServiceConfig::new("1", "secret", "https://auth.example/");
        assert_eq!(config.redirect_uri(), "https://auth.example/oauth-callback");
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    /// 把授权地址转给模拟的浏览器
    struct ChannelPresenter(mpsc::UnboundedSender<Url>);

    impl UrlPresenter for ChannelPresenter {
        fn present(&self, url: &Url) {
            let _ = self.0.send(url.clone());
        }
    }

    struct NoopApi;

    #[async_trait]
    impl AuthApi for NoopApi {
        async fn exchange_credentials(&self, _: &str, _: &str) -> Result<String, AuthError> {
            Err(AuthError::InvalidCredentials)
        }

        async fn account_username(&self, _: &str) -> Result<Option<String>, AuthError> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn browser_callback_completes_cli_session() {
        let (service, store, _) = service();
        let config = RemoteConfig {
            client_id: Some("1".into()),
            auth_url: Some("https://auth.example".into()),
            ..Default::default()
        };
        let manager = SessionManager::new(config, store, Arc::new(NoopApi));

        let (tx, mut rx) = mpsc::unbounded_channel::<Url>();
        let browser = tokio::spawn(async move {
            let url = rx.recv().await.unwrap();
            let state = url
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap();
            tokio::time::sleep(Duration::from_secs(20)).await;
            service.handle_callback(Some(state.as_str()), Some("good")).await.unwrap();
        });

        let token = manager
            .start_authorization_code_flow(&ChannelPresenter(tx))
            .await
            .unwrap();

        assert_eq!(token, "token-from-code");
        browser.await.unwrap();
    }
}
