//! 命令行一侧的会话管理
//!
//! 登录方式互斥：令牌、用户名密码、授权码三选一。授权码流程生成一个不可猜测
//! 的会话 id，把授权地址交给用户后按固定间隔轮询令牌存储，直到拿到令牌或超时。

use super::presenter::UrlPresenter;
use super::store::TokenStore;
use super::{AuthSession, SESSION_TTL};
use crate::config::RemoteConfig;
use crate::error::{AuthError, RemoteError};
use crate::storage::PutioClient;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 登录时用到的远程接口
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// 用户名密码换取令牌
    async fn exchange_credentials(&self, username: &str, password: &str) -> Result<String, AuthError>;

    /// 令牌有效时返回用户名，无效时返回 None
    async fn account_username(&self, token: &str) -> Result<Option<String>, AuthError>;
}

/// 通过授权服务和 put.io API 实现的 [`AuthApi`]
pub struct HttpAuthApi {
    http: Client,
    config: RemoteConfig,
}

impl HttpAuthApi {
    pub fn new(config: &RemoteConfig) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn exchange_credentials(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let auth_url = require(self.config.auth_url.as_deref(), "未配置授权服务地址 (PUTIO_AUTH_URL)")?;

        let response = self
            .http
            .post(format!("{}/create-access-token", auth_url.trim_end_matches('/')))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!("create-access-token 返回 {}", status);
            return Err(AuthError::InvalidCredentials);
        }

        let token = response.text().await?.trim().to_string();
        if token.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(token)
    }

    async fn account_username(&self, token: &str) -> Result<Option<String>, AuthError> {
        let client = PutioClient::new(&self.config, token)?;
        match client.account_username().await {
            Ok(username) => Ok(Some(username)),
            Err(RemoteError::Unauthorized) => Ok(None),
            Err(RemoteError::Api { status, .. }) if (400..500).contains(&status) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn require<'a>(value: Option<&'a str>, message: &str) -> Result<&'a str, AuthError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AuthError::Configuration(message.to_string()))
}

/// 登录会话管理
pub struct SessionManager {
    config: RemoteConfig,
    store: Arc<dyn TokenStore>,
    api: Arc<dyn AuthApi>,
    poll_interval: Duration,
    deadline: Duration,
}

impl SessionManager {
    pub fn new(config: RemoteConfig, store: Arc<dyn TokenStore>, api: Arc<dyn AuthApi>) -> Self {
        let poll_interval = config.poll_interval();
        Self {
            config,
            store,
            api,
            poll_interval,
            deadline: SESSION_TTL,
        }
    }

    /// 轮询间隔，至少 1 毫秒
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// 从会话开始算起的最长等待时间
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// 新建会话，id 为随机 UUID
    pub fn create_session(&self) -> AuthSession {
        AuthSession::new(Uuid::new_v4().simple().to_string())
    }

    /// 拼出授权页面地址，会话 id 作为 `state` 传给授权服务器
    pub fn authorization_url(&self, session_id: &str) -> Result<Url, AuthError> {
        let client_id = require(self.config.client_id.as_deref(), "未配置 client id (PUTIO_CLIENT_ID)")?;
        let auth_url = require(self.config.auth_url.as_deref(), "未配置授权服务地址 (PUTIO_AUTH_URL)")?;

        let mut url = Url::parse(&format!(
            "{}/oauth2/authenticate",
            self.config.api_url.trim_end_matches('/')
        ))
        .map_err(|e| AuthError::Configuration(format!("无效的 API 地址: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("response_type", "code")
            .append_pair(
                "redirect_uri",
                &format!("{}/oauth-callback", auth_url.trim_end_matches('/')),
            )
            .append_pair("state", session_id);

        Ok(url)
    }

    /// 授权码登录：展示授权地址并等待令牌
    pub async fn start_authorization_code_flow(
        &self,
        presenter: &dyn UrlPresenter,
    ) -> Result<String, AuthError> {
        let mut session = self.create_session();
        let url = self.authorization_url(&session.id)?;

        info!(session = %session.id, store = self.store.name(), "开始授权码登录");
        presenter.present(&url);

        self.wait_for_token(&mut session).await
    }

    /// 轮询令牌存储直到拿到令牌或超过截止时间
    ///
    /// 截止时间从会话创建时算起。读取存储出错视为暂时性问题，记录后继续轮询。
    pub async fn wait_for_token(&self, session: &mut AuthSession) -> Result<String, AuthError> {
        let started = session.started_at;
        let deadline = started + self.deadline;

        loop {
            match self.store.get(&session.id).await {
                Ok(Some(token)) => {
                    info!(session = %session.id, "授权完成");
                    session.complete(token.clone());
                    return Ok(token);
                }
                Ok(None) => debug!(session = %session.id, "尚未授权"),
                Err(e) => warn!(session = %session.id, "读取令牌存储失败，稍后重试: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                session.expire();
                return Err(AuthError::AuthorizationTimeout {
                    session_id: session.id.clone(),
                    waited_secs: (now - started).as_secs(),
                });
            }

            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// 用户名密码登录
    pub async fn authenticate_with_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::Configuration("用户名和密码不能为空".to_string()));
        }
        let token = self.api.exchange_credentials(username.trim(), password).await?;
        info!("用户名密码登录成功");
        Ok(token)
    }

    /// 校验令牌，有效时返回用户名
    pub async fn verify_token(&self, token: &str) -> Result<Option<String>, AuthError> {
        self.api.account_username(token).await
    }
}
