use std::path::PathBuf;

pub mod auth;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::config::AppConfig;
pub use crate::core::{SyncConfig, SyncEngine, SyncReport, SyncRequest};
pub use crate::error::{AuthError, RemoteError, SyncError};

/// 应用配置目录
///
/// `PUTSYNC_CONFIG_DIR` 优先，否则使用系统配置目录下的 `putsync`。
pub fn app_config_dir() -> PathBuf {
    std::env::var("PUTSYNC_CONFIG_DIR")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|p| p.join("putsync")))
        .unwrap_or_else(|| PathBuf::from(".putsync"))
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
