use crate::core::resolver::{DirectoryResolver, FolderPolicy, Placement};
use crate::core::scanner::{scan_tree, LocalNode};
use crate::error::{FailedUpload, RemoteError, SyncError};
use crate::storage::{RemoteDirectoryHandle, RemoteEntry, RemoteFs};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 单个文件上传的最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），按 2 的幂递增
    pub retry_base_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay_ms: 1000,
        }
    }
}

/// 一次同步请求
#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// 本地根目录
    pub local_root: PathBuf,
    /// 远程父路径，例如 `/` 或 `/backups/2024`
    pub target_path: String,
    /// 远程目录名，缺省为本地目录名
    pub name_override: Option<String>,
    /// 同名顶层目录已存在时是否替换
    pub overwrite: bool,
    /// 是否发送进度事件
    pub verbose: bool,
}

/// 进度事件，`path` 为远程侧的相对路径（以目标目录名开头）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// 目录已创建、替换或沿用
    Folder {
        path: String,
        remote_id: i64,
        created: bool,
        replaced: bool,
    },
    /// 即将上传一个文件
    Uploading {
        path: String,
        index: usize,
        total_files: usize,
        size: u64,
        bytes_done: u64,
        total_bytes: u64,
    },
    /// 文件上传失败，遍历继续
    UploadFailed { path: String, reason: String },
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub folder: RemoteDirectoryHandle,
    pub folders_created: usize,
    pub folders_reused: usize,
    pub files_uploaded: usize,
    pub bytes_uploaded: u64,
    pub total_files: usize,
    pub total_bytes: u64,
    pub duration_ms: u64,
}

/// 待处理的单元：目录需要先放置，文件需要上传到已放置的目录
enum Work<'a> {
    Dir {
        node: &'a LocalNode,
        parent: RemoteDirectoryHandle,
        path: String,
    },
    File {
        node: &'a LocalNode,
        parent_id: i64,
        path: String,
    },
}

impl<'a> Work<'a> {
    fn for_child(node: &'a LocalNode, parent: &RemoteDirectoryHandle, parent_path: &str) -> Self {
        let path = format!("{}/{}", parent_path, node.name());
        if node.is_dir() {
            Work::Dir {
                node,
                parent: parent.clone(),
                path,
            }
        } else {
            Work::File {
                node,
                parent_id: parent.id,
                path,
            }
        }
    }
}

/// 运行中的统计
#[derive(Debug, Default)]
struct Progress {
    folders_created: usize,
    folders_reused: usize,
    files_attempted: usize,
    files_uploaded: usize,
    bytes_attempted: u64,
    bytes_uploaded: u64,
    failed: Vec<FailedUpload>,
}

impl Progress {
    fn record_folder(&mut self, placement: Placement) {
        match placement {
            Placement::Reused => self.folders_reused += 1,
            Placement::Created | Placement::Replaced => self.folders_created += 1,
        }
    }
}

/// 文件夹同步引擎
pub struct SyncEngine {
    remote: Arc<dyn RemoteFs>,
    resolver: DirectoryResolver,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteFs>) -> Self {
        Self::with_config(remote, SyncConfig::default())
    }

    pub fn with_config(remote: Arc<dyn RemoteFs>, config: SyncConfig) -> Self {
        Self {
            resolver: DirectoryResolver::new(remote.clone()),
            remote,
            config,
        }
    }

    /// 把本地目录树镜像到远程
    ///
    /// 目录冲突立即中止；单个文件上传失败只记录，全部遍历完后以
    /// `PartialUploadFailure` 汇总返回。
    pub async fn synchronize(
        &self,
        request: &SyncRequest,
        progress_tx: Option<mpsc::Sender<SyncEvent>>,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let progress_tx = progress_tx.filter(|_| request.verbose);

        // `.`、`foo/..` 这样的路径先解析成绝对路径，目录名才可靠
        let local_root = tokio::fs::canonicalize(&request.local_root)
            .await
            .map_err(|e| SyncError::Scan(format!("{}: {}", request.local_root.display(), e)))?;
        let destination = destination_name(&local_root, request.name_override.as_deref())?;

        let tree = scan_local(&local_root).await?;
        let (total_files, total_bytes) = tree.totals();

        info!(
            "开始同步: {:?} -> {}:{} ({}, {} 个文件)",
            request.local_root,
            self.remote.name(),
            request.target_path,
            destination,
            total_files
        );

        // 1. 目标父路径
        let segments = DirectoryResolver::split_path(&request.target_path);
        let parent = self.resolver.ensure_path(&segments).await?;

        // 2. 顶层目录
        let (top, placement) = self
            .resolver
            .place_folder_with(&parent, &destination, FolderPolicy::top_level(request.overwrite))
            .await?;

        let mut progress = Progress::default();
        progress.record_folder(placement);
        Self::send_progress(&progress_tx, folder_event(&destination, &top, placement)).await;

        // 3. 深度优先遍历，子节点已按名称排序
        let mut stack: Vec<Work> = tree
            .children
            .iter()
            .rev()
            .map(|child| Work::for_child(child, &top, &destination))
            .collect();

        while let Some(work) = stack.pop() {
            match work {
                Work::Dir { node, parent, path } => {
                    let (handle, placement) = self
                        .resolver
                        .place_folder_with(&parent, &node.name(), FolderPolicy::Reuse)
                        .await?;
                    debug!("目录就绪: {} ({:?})", path, placement);
                    progress.record_folder(placement);
                    Self::send_progress(&progress_tx, folder_event(&path, &handle, placement))
                        .await;

                    stack.extend(
                        node.children
                            .iter()
                            .rev()
                            .map(|child| Work::for_child(child, &handle, &path)),
                    );
                }
                Work::File {
                    node,
                    parent_id,
                    path,
                } => {
                    progress.files_attempted += 1;
                    Self::send_progress(
                        &progress_tx,
                        SyncEvent::Uploading {
                            path: path.clone(),
                            index: progress.files_attempted,
                            total_files,
                            size: node.size,
                            bytes_done: progress.bytes_attempted,
                            total_bytes,
                        },
                    )
                    .await;
                    progress.bytes_attempted += node.size;

                    match self.upload_with_retry(parent_id, &node.path).await {
                        Ok(entry) => {
                            debug!("上传完成: {} ({} 字节)", path, entry.size);
                            progress.files_uploaded += 1;
                            progress.bytes_uploaded += node.size;
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            warn!("上传失败: {} - {}", path, reason);
                            Self::send_progress(
                                &progress_tx,
                                SyncEvent::UploadFailed {
                                    path: path.clone(),
                                    reason: reason.clone(),
                                },
                            )
                            .await;
                            progress.failed.push(FailedUpload {
                                path: node.path.clone(),
                                reason,
                            });
                        }
                    }
                }
            }
        }

        info!(
            "同步结束: {} - 新建目录 {}, 沿用目录 {}, 上传 {}, 失败 {}",
            destination,
            progress.folders_created,
            progress.folders_reused,
            progress.files_uploaded,
            progress.failed.len()
        );

        if !progress.failed.is_empty() {
            error!("{} 个文件上传失败", progress.failed.len());
            return Err(SyncError::PartialUploadFailure {
                failed: progress.failed,
                uploaded: progress.files_uploaded,
            });
        }

        Ok(SyncReport {
            folder: top,
            folders_created: progress.folders_created,
            folders_reused: progress.folders_reused,
            files_uploaded: progress.files_uploaded,
            bytes_uploaded: progress.bytes_uploaded,
            total_files,
            total_bytes,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// 带重试的单文件上传
    async fn upload_with_retry(
        &self,
        parent_id: i64,
        local_path: &Path,
    ) -> Result<RemoteEntry, RemoteError> {
        let mut attempt = 0;
        loop {
            match self.remote.upload(parent_id, local_path).await {
                Ok(entry) => return Ok(entry),
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    // 指数退避
                    let delay = self.config.retry_base_delay_ms * 2_u64.pow(attempt);
                    attempt += 1;
                    warn!(
                        "上传失败，{}ms 后重试 ({}/{}): {:?} - {}",
                        delay, attempt, self.config.max_retries, local_path, e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_progress(tx: &Option<mpsc::Sender<SyncEvent>>, event: SyncEvent) {
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }
}

fn folder_event(path: &str, handle: &RemoteDirectoryHandle, placement: Placement) -> SyncEvent {
    SyncEvent::Folder {
        path: path.to_string(),
        remote_id: handle.id,
        created: placement != Placement::Reused,
        replaced: placement == Placement::Replaced,
    }
}

/// 远程顶层目录名：显式指定的名字，否则取本地目录名
fn destination_name(local_root: &Path, name_override: Option<&str>) -> Result<String, SyncError> {
    let name = match name_override {
        Some(name) => name.trim().to_string(),
        None => local_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    if name.is_empty() {
        return Err(SyncError::Configuration(format!(
            "无法确定 `{}` 对应的目标目录名，请用 --name 指定",
            local_root.display()
        )));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(SyncError::Configuration(format!("无效的目标目录名: `{}`", name)));
    }
    Ok(name)
}

fn is_retryable(e: &RemoteError) -> bool {
    match e {
        RemoteError::Http(_) => true,
        RemoteError::Api { status, .. } => *status >= 500,
        _ => false,
    }
}

/// 扫描放到阻塞线程中进行
async fn scan_local(root: &Path) -> Result<LocalNode, SyncError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan_tree(&root))
        .await
        .map_err(|e| SyncError::Scan(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryRemote, RemoteOp, ROOT_ID};
    use std::fs;
    use tempfile::TempDir;

    /// root/{a.txt, sub/{b.txt}}
    fn sample_tree() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), "hello").unwrap();
        fs::write(root.join("sub/b.txt"), "world!").unwrap();
        (dir, root)
    }

    fn request(root: &Path) -> SyncRequest {
        SyncRequest {
            local_root: root.to_path_buf(),
            target_path: "/".to_string(),
            name_override: None,
            overwrite: false,
            verbose: true,
        }
    }

    fn engine(remote: &Arc<MemoryRemote>) -> SyncEngine {
        SyncEngine::with_config(
            remote.clone(),
            SyncConfig {
                max_retries: 0,
                retry_base_delay_ms: 1,
            },
        )
    }

    async fn collect(mut rx: mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    fn event_paths(events: &[SyncEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                SyncEvent::Folder { path, .. } => format!("dir {}", path),
                SyncEvent::Uploading { path, .. } => format!("file {}", path),
                SyncEvent::UploadFailed { path, .. } => format!("failed {}", path),
            })
            .collect()
    }

    #[tokio::test]
    async fn mirrors_tree_in_depth_first_order() {
        let (_dir, root) = sample_tree();
        let remote = Arc::new(MemoryRemote::new());
        let (tx, rx) = mpsc::channel(64);

        let report = engine(&remote)
            .synchronize(&request(&root), Some(tx))
            .await
            .unwrap();

        assert_eq!(
            event_paths(&collect(rx).await),
            ["dir root", "file root/a.txt", "dir root/sub", "file root/sub/b.txt"]
        );
        assert_eq!(report.folders_created, 2);
        assert_eq!(report.files_uploaded, 2);
        assert_eq!(report.bytes_uploaded, 11);
        assert!(remote.find(&["root", "a.txt"]).await.is_some());
        assert!(remote.find(&["root", "sub", "b.txt"]).await.is_some());

        // 每个目录先于其中的文件创建
        let root_id = report.folder.id;
        let sub_id = remote.find(&["root", "sub"]).await.unwrap().id;
        assert_eq!(
            remote.operations().await,
            vec![
                RemoteOp::CreateFolder {
                    parent_id: ROOT_ID,
                    name: "root".into()
                },
                RemoteOp::Upload {
                    parent_id: root_id,
                    name: "a.txt".into()
                },
                RemoteOp::CreateFolder {
                    parent_id: root_id,
                    name: "sub".into()
                },
                RemoteOp::Upload {
                    parent_id: sub_id,
                    name: "b.txt".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn quiet_mode_emits_no_events() {
        let (_dir, root) = sample_tree();
        let remote = Arc::new(MemoryRemote::new());
        let (tx, rx) = mpsc::channel(64);
        let mut req = request(&root);
        req.verbose = false;

        engine(&remote).synchronize(&req, Some(tx)).await.unwrap();

        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn name_override_and_nested_target() {
        let (_dir, root) = sample_tree();
        let remote = Arc::new(MemoryRemote::new());
        let mut req = request(&root);
        req.target_path = "/backups/2024".into();
        req.name_override = Some("renamed".into());

        engine(&remote).synchronize(&req, None).await.unwrap();

        assert!(remote
            .find(&["backups", "2024", "renamed", "sub", "b.txt"])
            .await
            .is_some());
        assert!(remote.find(&["root"]).await.is_none());
    }

    #[tokio::test]
    async fn existing_folder_without_force_is_a_conflict() {
        let (_dir, root) = sample_tree();
        let remote = Arc::new(MemoryRemote::new());
        let existing = remote.seed_folder(ROOT_ID, "root").await;
        remote.seed_file(existing.id, "old.txt", 3).await;

        let err = engine(&remote)
            .synchronize(&request(&root), None)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::NameConflict { ref name, .. } if name == "root"));
        assert_eq!(remote.child_names(existing.id).await, ["old.txt"]);
        assert!(remote.operations().await.is_empty());
    }

    #[tokio::test]
    async fn force_replaces_existing_folder_contents() {
        let (_dir, root) = sample_tree();
        let remote = Arc::new(MemoryRemote::new());
        let existing = remote.seed_folder(ROOT_ID, "root").await;
        remote.seed_file(existing.id, "old.txt", 3).await;
        let stale = remote.seed_folder(existing.id, "sub").await;
        remote.seed_file(stale.id, "stale.txt", 3).await;
        let mut req = request(&root);
        req.overwrite = true;

        let report = engine(&remote).synchronize(&req, None).await.unwrap();

        assert_eq!(remote.child_names(report.folder.id).await, ["a.txt", "sub"]);
        let sub = remote.find(&["root", "sub"]).await.unwrap();
        assert_eq!(remote.child_names(sub.id).await, ["b.txt"]);
        assert_eq!(remote.child_names(ROOT_ID).await, ["root"]);
    }

    #[tokio::test]
    async fn file_with_destination_name_is_a_conflict_even_with_force() {
        let (_dir, root) = sample_tree();
        for overwrite in [false, true] {
            let remote = Arc::new(MemoryRemote::new());
            remote.seed_file(ROOT_ID, "root", 9).await;
            let mut req = request(&root);
            req.overwrite = overwrite;

            let err = engine(&remote).synchronize(&req, None).await.unwrap_err();

            assert!(matches!(err, SyncError::NameConflict { .. }));
            assert!(remote.operations().await.is_empty());
        }
    }

    #[tokio::test]
    async fn blocked_target_path_is_fatal() {
        let (_dir, root) = sample_tree();
        let remote = Arc::new(MemoryRemote::new());
        remote.seed_file(ROOT_ID, "backups", 1).await;
        let mut req = request(&root);
        req.target_path = "/backups/daily".into();

        let err = engine(&remote).synchronize(&req, None).await.unwrap_err();

        assert!(matches!(err, SyncError::PathBlockedByFile { ref path } if path == "/backups"));
    }

    #[tokio::test]
    async fn upload_failures_are_collected_and_traversal_continues() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("z")).unwrap();
        fs::write(root.join("a.txt"), "1").unwrap();
        fs::write(root.join("bad.txt"), "2").unwrap();
        fs::write(root.join("c.txt"), "3").unwrap();
        fs::write(root.join("z/d.txt"), "4").unwrap();

        let remote = Arc::new(MemoryRemote::new());
        remote.fail_uploads_named("bad.txt").await;
        let (tx, rx) = mpsc::channel(64);

        let err = engine(&remote)
            .synchronize(&request(&root), Some(tx))
            .await
            .unwrap_err();

        match err {
            SyncError::PartialUploadFailure { failed, uploaded } => {
                assert_eq!(uploaded, 3);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].path, fs::canonicalize(&root).unwrap().join("bad.txt"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(
            event_paths(&collect(rx).await),
            [
                "dir root",
                "file root/a.txt",
                "file root/bad.txt",
                "failed root/bad.txt",
                "file root/c.txt",
                "dir root/z",
                "file root/z/d.txt",
            ]
        );
        assert!(remote.find(&["root", "z", "d.txt"]).await.is_some());
    }

    #[tokio::test]
    async fn transient_upload_errors_are_retried() {
        let (_dir, root) = sample_tree();
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_uploads_named("a.txt").await;
        let engine = SyncEngine::with_config(
            remote.clone(),
            SyncConfig {
                max_retries: 2,
                retry_base_delay_ms: 1,
            },
        );

        let err = engine.synchronize(&request(&root), None).await.unwrap_err();

        assert!(matches!(err, SyncError::PartialUploadFailure { uploaded: 1, .. }));
        let attempts = remote
            .operations()
            .await
            .into_iter()
            .filter(|op| matches!(op, RemoteOp::Upload { name, .. } if name == "a.txt"))
            .count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn local_root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let remote = Arc::new(MemoryRemote::new());

        let err = engine(&remote)
            .synchronize(&request(&file), None)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Configuration(_)));
        assert!(remote.operations().await.is_empty());
    }

    #[tokio::test]
    async fn root_without_final_component_uses_resolved_name() {
        let (_dir, root) = sample_tree();
        let remote = Arc::new(MemoryRemote::new());

        let report = engine(&remote)
            .synchronize(&request(&root.join("sub").join("..")), None)
            .await
            .unwrap();

        assert_eq!(report.folder.name, "root");
        assert_eq!(remote.child_names(ROOT_ID).await, ["root"]);
        assert!(remote.find(&["root", "sub", "b.txt"]).await.is_some());
    }

    #[tokio::test]
    async fn filesystem_root_needs_an_explicit_name() {
        let remote = Arc::new(MemoryRemote::new());

        let err = engine(&remote)
            .synchronize(&request(Path::new("/")), None)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Configuration(_)));
        assert!(remote.operations().await.is_empty());
    }

    #[tokio::test]
    async fn name_override_must_be_a_single_segment() {
        let (_dir, root) = sample_tree();
        let remote = Arc::new(MemoryRemote::new());

        for name in ["a/b", "a\\b", "  ", ".."] {
            let mut req = request(&root);
            req.name_override = Some(name.to_string());

            let err = engine(&remote).synchronize(&req, None).await.unwrap_err();
            assert!(matches!(err, SyncError::Configuration(_)), "{name}");
        }
        assert!(remote.operations().await.is_empty());
    }
}
