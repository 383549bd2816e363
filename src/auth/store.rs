//! 临时令牌存储
//!
//! 授权服务按会话 id 写入令牌，命令行一侧按同一 id 轮询读取。条目在 TTL
//! 到期后一定不可见；读取方不区分"已过期"和"从未写入"。

use crate::error::AuthError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// 令牌存储接口
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// 写入，`ttl` 之后保证不可见
    async fn put(&self, session_id: &str, value: &str, ttl: Duration) -> Result<(), AuthError>;

    /// 读取，不存在或已过期时返回 None，不会阻塞等待
    async fn get(&self, session_id: &str) -> Result<Option<String>, AuthError>;

    /// 存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, session_id: &str, value: &str, ttl: Duration) -> Result<(), AuthError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(session_id.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<String>, AuthError> {
        let mut entries = self.entries.lock().await;
        match entries.get(session_id) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(session_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// SQLite 存储，授权服务和命令行可以共享同一个数据库文件
pub struct SqliteTokenStore {
    db: SqlitePool,
    name: String,
}

impl SqliteTokenStore {
    /// 连接（必要时创建）数据库，例如 `sqlite:tokens.db`
    pub async fn connect(url: &str) -> Result<Self, AuthError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;
        let mut store = Self::from_pool(db).await?;
        store.name = format!("sqlite:{}", url.trim_start_matches("sqlite:"));
        Ok(store)
    }

    /// 使用已有连接池，并确保表存在
    pub async fn from_pool(db: SqlitePool) -> Result<Self, AuthError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS auth_tokens (
                   session_id TEXT PRIMARY KEY,
                   token TEXT NOT NULL,
                   expires_at INTEGER NOT NULL
               )"#,
        )
        .execute(&db)
        .await?;

        Ok(Self {
            db,
            name: "sqlite".to_string(),
        })
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn put(&self, session_id: &str, value: &str, ttl: Duration) -> Result<(), AuthError> {
        let now = Self::now_ms();

        // 顺带清理过期条目
        sqlx::query("DELETE FROM auth_tokens WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.db)
            .await?;

        sqlx::query(
            r#"INSERT INTO auth_tokens (session_id, token, expires_at)
               VALUES (?, ?, ?)
               ON CONFLICT(session_id) DO UPDATE SET
                   token = excluded.token,
                   expires_at = excluded.expires_at"#,
        )
        .bind(session_id)
        .bind(value)
        .bind(now + ttl.as_millis() as i64)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<String>, AuthError> {
        let token = sqlx::query_scalar::<_, String>(
            "SELECT token FROM auth_tokens WHERE session_id = ? AND expires_at > ?",
        )
        .bind(session_id)
        .bind(Self::now_ms())
        .fetch_optional(&self.db)
        .await?;
        Ok(token)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 通过授权服务的 `/get-access-token` 接口读取，只读
pub struct HttpTokenStore {
    http: Client,
    base_url: String,
}

impl HttpTokenStore {
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TokenStore for HttpTokenStore {
    async fn put(&self, _session_id: &str, _value: &str, _ttl: Duration) -> Result<(), AuthError> {
        Err(AuthError::Unsupported("HTTP 令牌存储只读"))
    }

    async fn get(&self, session_id: &str) -> Result<Option<String>, AuthError> {
        let response = self
            .http
            .get(format!("{}/get-access-token", self.base_url))
            .query(&[("state", session_id)])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let token = response.text().await?.trim().to_string();
                Ok(Some(token).filter(|t| !t.is_empty()))
            }
            status => {
                debug!("get-access-token 返回 {}", status);
                Err(AuthError::Store(format!("授权服务返回 HTTP {}", status.as_u16())))
            }
        }
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SESSION_TTL;

    #[tokio::test(start_paused = true)]
    async fn memory_entry_visible_until_ttl() {
        let store = MemoryTokenStore::new();
        store.put("s", "token", SESSION_TTL).await.unwrap();

        tokio::time::advance(SESSION_TTL - Duration::from_millis(1)).await;
        assert_eq!(store.get("s").await.unwrap().as_deref(), Some("token"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.get("s").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_missing_key_is_none() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get("never-written").await.unwrap(), None);
    }

    async fn sqlite_store() -> SqliteTokenStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteTokenStore::from_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn sqlite_round_trip_and_expiry() {
        let store = sqlite_store().await;

        store.put("live", "abc", SESSION_TTL).await.unwrap();
        store.put("gone", "xyz", Duration::ZERO).await.unwrap();

        assert_eq!(store.get("live").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(store.get("gone").await.unwrap(), None);
        assert_eq!(store.get("unknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sqlite_put_overwrites_same_session() {
        let store = sqlite_store().await;

        store.put("s", "first", SESSION_TTL).await.unwrap();
        store.put("s", "second", SESSION_TTL).await.unwrap();

        assert_eq!(store.get("s").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn sqlite_file_is_shared_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("tokens.db").display());

        let writer = SqliteTokenStore::connect(&url).await.unwrap();
        let reader = SqliteTokenStore::connect(&url).await.unwrap();
        writer.put("s", "shared", SESSION_TTL).await.unwrap();

        assert_eq!(reader.get("s").await.unwrap().as_deref(), Some("shared"));
    }

    #[tokio::test]
    async fn http_store_is_read_only() {
        let store = HttpTokenStore::new("http://127.0.0.1:9/").unwrap();
        assert_eq!(store.name(), "http://127.0.0.1:9");
        let err = store.put("s", "t", SESSION_TTL).await.unwrap_err();
        assert!(matches!(err, AuthError::Unsupported(_)));
    }
}
