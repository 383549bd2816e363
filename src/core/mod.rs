pub mod engine;
pub mod resolver;
pub mod scanner;

pub use engine::{SyncConfig, SyncEngine, SyncEvent, SyncReport, SyncRequest};
pub use resolver::{DirectoryResolver, FolderPolicy, Placement};
pub use scanner::{human_size, scan_tree, LocalNode, NodeKind};
