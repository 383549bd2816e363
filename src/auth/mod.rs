//! 登录与授权
//!
//! 授权码流程分两半：授权服务收到回调后把令牌写进 [`store::TokenStore`]，
//! 命令行一侧的 [`session::SessionManager`] 用同一个会话 id 轮询取回。

pub mod presenter;
pub mod service;
pub mod session;
pub mod store;

pub use presenter::{detect_presenter, BrowserPresenter, PrintPresenter, UrlPresenter};
pub use service::{AuthorizationService, PutioOAuth, ServiceConfig, TokenExchange};
pub use session::{AuthApi, HttpAuthApi, SessionManager};
pub use store::{HttpTokenStore, MemoryTokenStore, SqliteTokenStore, TokenStore};

use crate::error::AuthError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// 会话和令牌条目的有效期
pub const SESSION_TTL: Duration = Duration::from_secs(300);

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Completed,
    Expired,
}

/// 一次授权码登录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    /// 仅在 `Completed` 时存在
    #[serde(skip)]
    pub token: Option<String>,
    /// 轮询截止时间从这里算起，与 `expires_at` 对齐
    #[serde(skip)]
    pub(crate) started_at: Instant,
}

impl AuthSession {
    pub fn new(id: String) -> Self {
        let created_at = Utc::now();
        Self {
            id,
            created_at,
            expires_at: created_at + chrono::Duration::seconds(SESSION_TTL.as_secs() as i64),
            status: SessionStatus::Pending,
            token: None,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn complete(&mut self, token: String) {
        self.status = SessionStatus::Completed;
        self.token = Some(token);
    }

    pub(crate) fn expire(&mut self) {
        self.status = SessionStatus::Expired;
        self.token = None;
    }
}

/// 登录方式，三选一
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMode {
    /// 直接提供的令牌
    Token(String),
    /// 交互输入用户名密码
    Credentials,
    /// 浏览器授权码流程
    AuthorizationCode,
}

impl LoginMode {
    /// 根据命令行选项选择登录方式
    ///
    /// 同时给出令牌和 `--prompt` 属于配置错误，在发起任何网络请求前返回。
    pub fn select(token: Option<String>, prompt: bool) -> Result<Self, AuthError> {
        match (token, prompt) {
            (Some(_), true) => Err(AuthError::Configuration(
                "--token 与 --prompt 只能选择一个".to_string(),
            )),
            (Some(token), false) => {
                let token = token.trim().to_string();
                if token.is_empty() {
                    return Err(AuthError::Configuration("--token 不能为空".to_string()));
                }
                Ok(LoginMode::Token(token))
            }
            (None, true) => Ok(LoginMode::Credentials),
            (None, false) => Ok(LoginMode::AuthorizationCode),
        }
    }
}
