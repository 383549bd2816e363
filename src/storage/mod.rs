pub mod memory;
pub mod putio;

use crate::error::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use memory::{MemoryRemote, RemoteOp};
pub use putio::PutioClient;

// ============ 公共常量 ============

/// 根目录 id
pub const ROOT_ID: i64 = 0;
/// 非上传请求超时（秒）- 列目录、建目录、删除等
pub const OP_TIMEOUT_SECS: u64 = 60;

/// 远程条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// 远程条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub kind: EntryKind,
    pub size: u64,
}

impl RemoteEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

/// 远程目录句柄，创建后不会被修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteDirectoryHandle {
    pub id: i64,
    pub name: String,
    /// 根目录没有父目录
    pub parent_id: Option<i64>,
}

impl RemoteDirectoryHandle {
    pub fn root() -> Self {
        Self {
            id: ROOT_ID,
            name: String::new(),
            parent_id: None,
        }
    }
}

impl From<RemoteEntry> for RemoteDirectoryHandle {
    fn from(entry: RemoteEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            parent_id: entry.parent_id,
        }
    }
}

/// 远程存储接口
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// 列出父目录下的直接子条目
    async fn list(&self, parent_id: i64) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// 按名称查找子条目（同名时可能有多个）
    async fn lookup(&self, parent_id: i64, name: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        Ok(self
            .list(parent_id)
            .await?
            .into_iter()
            .filter(|e| e.name == name)
            .collect())
    }

    /// 创建目录，同名条目已存在时返回 `NameAlreadyExists`
    async fn create_folder(&self, parent_id: i64, name: &str) -> Result<RemoteEntry, RemoteError>;

    /// 删除条目（目录连同其内容）
    async fn delete(&self, id: i64) -> Result<(), RemoteError>;

    /// 把本地文件上传到目录下，使用本地文件名
    async fn upload(&self, parent_id: i64, local_path: &Path) -> Result<RemoteEntry, RemoteError>;

    /// 存储名称（用于日志）
    fn name(&self) -> &str;
}
