//! 远程目录解析
//!
//! 无状态：每次调用都以远程服务为准重新查询。检查与创建之间不是原子的，
//! 其他客户端同时在同一父目录下写入时可能出现竞争。

use crate::error::SyncError;
use crate::storage::{RemoteDirectoryHandle, RemoteFs};
use std::sync::Arc;
use tracing::{debug, info};

/// 目标位置已存在同名目录时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderPolicy {
    /// 报 `NameConflict`，不改动已有目录
    Fail,
    /// 删除已有目录（连同内容）后重新创建
    Replace,
    /// 直接沿用已有目录
    Reuse,
}

impl FolderPolicy {
    /// 顶层目录的策略：`--force` 时替换，否则冲突报错
    pub fn top_level(overwrite: bool) -> Self {
        if overwrite {
            FolderPolicy::Replace
        } else {
            FolderPolicy::Fail
        }
    }
}

/// 目录最终是怎么得到的
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Created,
    Replaced,
    Reused,
}

/// 远程目录解析器
pub struct DirectoryResolver {
    remote: Arc<dyn RemoteFs>,
}

impl DirectoryResolver {
    pub fn new(remote: Arc<dyn RemoteFs>) -> Self {
        Self { remote }
    }

    /// 把 `/a//b/` 这样的路径拆成 `["a", "b"]`
    pub fn split_path(path: &str) -> Vec<String> {
        path.split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_string)
            .collect()
    }

    /// 从根目录逐段确保路径存在，缺失的目录会被创建
    ///
    /// 某一段是文件时返回 `PathBlockedByFile`，之前已创建的目录保留。
    pub async fn ensure_path(
        &self,
        segments: &[String],
    ) -> Result<RemoteDirectoryHandle, SyncError> {
        let mut current = RemoteDirectoryHandle::root();
        let mut walked = String::new();

        for segment in segments {
            walked.push('/');
            walked.push_str(segment);

            let entries = self.remote.lookup(current.id, segment).await?;
            if let Some(dir) = entries.iter().find(|e| e.is_dir()) {
                debug!("沿用目录 {} ({})", walked, dir.id);
                current = dir.clone().into();
            } else if !entries.is_empty() {
                return Err(SyncError::PathBlockedByFile { path: walked });
            } else {
                let created = self.remote.create_folder(current.id, segment).await?;
                info!("创建目录 {} ({})", walked, created.id);
                current = created.into();
            }
        }

        Ok(current)
    }

    /// 确定同步目标目录，见 [`FolderPolicy::top_level`]
    pub async fn place_folder(
        &self,
        parent: &RemoteDirectoryHandle,
        name: &str,
        overwrite: bool,
    ) -> Result<RemoteDirectoryHandle, SyncError> {
        let (handle, _) = self
            .place_folder_with(parent, name, FolderPolicy::top_level(overwrite))
            .await?;
        Ok(handle)
    }

    /// 按策略在 `parent` 下放置名为 `name` 的目录
    ///
    /// 同名文件无论哪种策略都是 `NameConflict`，文件永远不会被删除。
    pub async fn place_folder_with(
        &self,
        parent: &RemoteDirectoryHandle,
        name: &str,
        policy: FolderPolicy,
    ) -> Result<(RemoteDirectoryHandle, Placement), SyncError> {
        let entries = self.remote.lookup(parent.id, name).await?;

        if entries.iter().any(|e| !e.is_dir()) {
            return Err(SyncError::NameConflict {
                name: name.to_string(),
                parent_id: parent.id,
            });
        }

        match (entries.first(), policy) {
            (None, _) => {
                let created = self.remote.create_folder(parent.id, name).await?;
                Ok((created.into(), Placement::Created))
            }
            (Some(_), FolderPolicy::Fail) => Err(SyncError::NameConflict {
                name: name.to_string(),
                parent_id: parent.id,
            }),
            (Some(dir), FolderPolicy::Reuse) => Ok((dir.clone().into(), Placement::Reused)),
            (Some(_), FolderPolicy::Replace) => {
                for dir in &entries {
                    info!("删除已有目录 {} ({})", dir.name, dir.id);
                    self.remote.delete(dir.id).await?;
                }
                let created = self.remote.create_folder(parent.id, name).await?;
                Ok((created.into(), Placement::Replaced))
            }
        }
    }
}
