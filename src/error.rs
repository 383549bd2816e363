//! 错误类型
//!
//! 远程 API、登录流程、文件夹同步各自一套错误；命令层统一转成 anyhow。

use std::path::PathBuf;
use thiserror::Error;

/// 远程存储 API 错误
#[derive(Error, Debug)]
pub enum RemoteError {
    /// 网络请求失败
    #[error("网络请求失败: {0}")]
    Http(#[from] reqwest::Error),

    /// 服务端返回了错误
    #[error("远程 API 错误 ({status}): {error_type} - {message}")]
    Api {
        status: u16,
        error_type: String,
        message: String,
    },

    /// 同一父目录下已存在同名条目
    #[error("`{parent_id}` 中已存在名为 `{name}` 的文件或文件夹")]
    NameAlreadyExists { name: String, parent_id: i64 },

    /// 访问令牌无效或已过期
    #[error("访问令牌无效")]
    Unauthorized,

    /// 响应格式不符合预期
    #[error("无法解析服务端响应: {0}")]
    InvalidResponse(String),

    /// 读取本地文件失败
    #[error("读取本地文件失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 登录流程错误
#[derive(Error, Debug)]
pub enum AuthError {
    /// 参数互斥或缺失，在任何网络请求之前检测
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 轮询截止时间已到，仍未拿到令牌
    #[error("授权超时: 会话 {session_id} 在 {waited_secs} 秒内未完成授权")]
    AuthorizationTimeout { session_id: String, waited_secs: u64 },

    /// 用户名或密码被拒绝
    #[error("用户名或密码错误")]
    InvalidCredentials,

    /// 令牌未通过校验
    #[error("访问令牌无效")]
    InvalidToken,

    /// 授权回调缺少必要参数
    #[error("请求缺少参数 `{0}`")]
    MissingParameter(&'static str),

    /// 令牌存储读写失败
    #[error("令牌存储错误: {0}")]
    Store(String),

    /// 该存储不支持此操作
    #[error("不支持的操作: {0}")]
    Unsupported(&'static str),

    /// 网络请求失败
    #[error("网络请求失败: {0}")]
    Http(#[from] reqwest::Error),

    /// 校验令牌时远程 API 出错
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        AuthError::Store(e.to_string())
    }
}

/// 上传失败的单个文件，记录后继续遍历
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub path: PathBuf,
    pub reason: String,
}

/// 文件夹同步错误
#[derive(Error, Debug)]
pub enum SyncError {
    /// 请求本身不合法（例如本地路径不是文件夹）
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 目标路径中的某一段是文件
    #[error("目标路径被文件占用: `{path}`")]
    PathBlockedByFile { path: String },

    /// 目标位置已存在同名条目
    #[error("`{parent_id}` 中已存在名为 `{name}` 的文件或文件夹")]
    NameConflict { name: String, parent_id: i64 },

    /// 同步结束时仍有文件上传失败
    #[error("{} 个文件上传失败，其余 {uploaded} 个文件上传成功", failed.len())]
    PartialUploadFailure {
        failed: Vec<FailedUpload>,
        uploaded: usize,
    },

    /// 扫描本地目录失败
    #[error("扫描本地目录失败: {0}")]
    Scan(String),

    /// 其他远程错误（目录创建、删除、列目录）
    #[error(transparent)]
    Remote(RemoteError),
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::NameAlreadyExists { name, parent_id } => {
                SyncError::NameConflict { name, parent_id }
            }
            other => SyncError::Remote(other),
        }
    }
}
