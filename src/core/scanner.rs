use crate::error::SyncError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 本地条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// 扫描得到的本地条目，子节点按名称排序
#[derive(Debug, Clone)]
pub struct LocalNode {
    pub path: PathBuf,
    pub kind: NodeKind,
    /// 文件大小，目录为 0
    pub size: u64,
    pub children: Vec<LocalNode>,
}

impl LocalNode {
    fn new(path: PathBuf, kind: NodeKind, size: u64) -> Self {
        Self {
            path,
            kind,
            size,
            children: Vec::new(),
        }
    }

    /// 条目名称
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// 子树中的文件数和总字节数
    pub fn totals(&self) -> (usize, u64) {
        match self.kind {
            NodeKind::File => (1, self.size),
            NodeKind::Directory => self.children.iter().fold((0, 0), |(n, s), c| {
                let (cn, cs) = c.totals();
                (n + cn, s + cs)
            }),
        }
    }
}

/// 扫描本地目录，返回以 `root` 为根、按名称深度优先排序的树
///
/// 不跟随符号链接；既不是普通文件也不是目录的条目会被跳过。
pub fn scan_tree(root: &Path) -> Result<LocalNode, SyncError> {
    let metadata = std::fs::metadata(root)
        .map_err(|e| SyncError::Scan(format!("{}: {}", root.display(), e)))?;
    if !metadata.is_dir() {
        return Err(SyncError::Configuration(format!(
            "`{}` 不是文件夹",
            root.display()
        )));
    }

    // 栈中第 i 个元素是深度为 i 的目录
    let mut stack: Vec<LocalNode> = Vec::new();
    let mut skipped = 0usize;

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| SyncError::Scan(e.to_string()))?;
        let depth = entry.depth();
        let file_type = entry.file_type();

        let node = if file_type.is_dir() {
            LocalNode::new(entry.path().to_path_buf(), NodeKind::Directory, 0)
        } else if file_type.is_file() {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            LocalNode::new(entry.path().to_path_buf(), NodeKind::File, size)
        } else {
            debug!("跳过非普通文件: {:?}", entry.path());
            skipped += 1;
            continue;
        };

        // 收起比当前条目更深的目录
        collapse(&mut stack, depth.max(1));

        if node.is_dir() {
            stack.push(node);
        } else if let Some(parent) = stack.last_mut() {
            parent.children.push(node);
        }
    }

    collapse(&mut stack, 1);

    let tree = stack
        .pop()
        .ok_or_else(|| SyncError::Scan(format!("{}: 未扫描到根目录", root.display())))?;

    let (files, bytes) = tree.totals();
    if skipped > 0 {
        warn!("跳过 {} 个非普通文件", skipped);
    }
    info!("扫描完成: {} 个文件, {}", files, human_size(bytes));

    Ok(tree)
}

/// 把栈收起到 `len` 层，弹出的目录挂到上一层
fn collapse(stack: &mut Vec<LocalNode>, len: usize) {
    while stack.len() > len {
        let Some(done) = stack.pop() else { break };
        if let Some(parent) = stack.last_mut() {
            parent.children.push(done);
        }
    }
}

/// 格式化字节数
pub fn human_size(size: u64) -> String {
    if size > 1_000_000_000 {
        format!("{:.1} GB", size as f64 / 1_000_000_000.0)
    } else if size > 1_000_000 {
        format!("{} MB", size / 1_000_000)
    } else if size > 1_000 {
        format!("{} KB", size / 1_000)
    } else {
        format!("{} B", size)
    }
}
