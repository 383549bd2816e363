//! 内存中的远程存储，用于测试和本地演练

use super::{EntryKind, RemoteEntry, RemoteFs, ROOT_ID};
use crate::error::RemoteError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::sync::Mutex;

/// 记录下来的写操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    CreateFolder { parent_id: i64, name: String },
    Delete { id: i64 },
    Upload { parent_id: i64, name: String },
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<i64, RemoteEntry>,
    next_id: i64,
    ops: Vec<RemoteOp>,
    failing_uploads: HashSet<String>,
}

impl State {
    fn insert(&mut self, parent_id: i64, name: &str, kind: EntryKind, size: u64) -> RemoteEntry {
        self.next_id += 1;
        let entry = RemoteEntry {
            id: self.next_id,
            name: name.to_string(),
            parent_id: Some(parent_id),
            kind,
            size,
        };
        self.entries.insert(entry.id, entry.clone());
        entry
    }

    fn children(&self, parent_id: i64) -> impl Iterator<Item = &RemoteEntry> {
        self.entries
            .values()
            .filter(move |e| e.parent_id == Some(parent_id))
    }

    fn parent_exists(&self, parent_id: i64) -> bool {
        parent_id == ROOT_ID || self.entries.get(&parent_id).is_some_and(RemoteEntry::is_dir)
    }
}

/// 内存远程存储
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一个目录
    pub async fn seed_folder(&self, parent_id: i64, name: &str) -> RemoteEntry {
        self.state
            .lock()
            .await
            .insert(parent_id, name, EntryKind::Folder, 0)
    }

    /// 预置一个文件
    pub async fn seed_file(&self, parent_id: i64, name: &str, size: u64) -> RemoteEntry {
        self.state
            .lock()
            .await
            .insert(parent_id, name, EntryKind::File, size)
    }

    /// 让指定文件名的上传始终失败
    pub async fn fail_uploads_named(&self, name: &str) {
        self.state.lock().await.failing_uploads.insert(name.to_string());
    }

    /// 已记录的写操作
    pub async fn operations(&self) -> Vec<RemoteOp> {
        self.state.lock().await.ops.clone()
    }

    /// 按路径查找条目，例如 `["root", "sub", "b.txt"]`
    pub async fn find(&self, segments: &[&str]) -> Option<RemoteEntry> {
        let state = self.state.lock().await;
        let mut parent = ROOT_ID;
        let mut found = None;
        for segment in segments {
            let entry = state.children(parent).find(|e| e.name == *segment)?.clone();
            parent = entry.id;
            found = Some(entry);
        }
        found
    }

    /// 子条目名称（排序后）
    pub async fn child_names(&self, parent_id: i64) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.children(parent_id).map(|e| e.name.clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl RemoteFs for MemoryRemote {
    async fn list(&self, parent_id: i64) -> Result<Vec<RemoteEntry>, RemoteError> {
        let state = self.state.lock().await;
        if !state.parent_exists(parent_id) {
            return Err(RemoteError::Api {
                status: 404,
                error_type: "NOT_FOUND".into(),
                message: format!("目录 {} 不存在", parent_id),
            });
        }
        Ok(state.children(parent_id).cloned().collect())
    }

    async fn create_folder(&self, parent_id: i64, name: &str) -> Result<RemoteEntry, RemoteError> {
        let mut state = self.state.lock().await;
        state.ops.push(RemoteOp::CreateFolder {
            parent_id,
            name: name.to_string(),
        });
        if state.children(parent_id).any(|e| e.name == name) {
            return Err(RemoteError::NameAlreadyExists {
                name: name.to_string(),
                parent_id,
            });
        }
        Ok(state.insert(parent_id, name, EntryKind::Folder, 0))
    }

    async fn delete(&self, id: i64) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        state.ops.push(RemoteOp::Delete { id });

        // 连同所有后代一起删除
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            pending.extend(state.children(current).map(|e| e.id));
            state.entries.remove(&current);
        }
        Ok(())
    }

    async fn upload(&self, parent_id: i64, local_path: &Path) -> Result<RemoteEntry, RemoteError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let size = tokio::fs::metadata(local_path).await?.len();

        let mut state = self.state.lock().await;
        state.ops.push(RemoteOp::Upload {
            parent_id,
            name: name.clone(),
        });
        if state.failing_uploads.contains(&name) {
            return Err(RemoteError::Api {
                status: 503,
                error_type: "SERVICE_UNAVAILABLE".into(),
                message: format!("上传 {} 失败", name),
            });
        }
        Ok(state.insert(parent_id, &name, EntryKind::File, size))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
