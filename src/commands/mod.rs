//! 命令行子命令
//!
//! 每个子命令一个模块：`run` 负责组装真实的网络组件，`execute` 只依赖注入进来的
//! 接口，便于测试。

pub mod login;
pub mod upload;

use crate::config::AppConfig;

/// 取要使用的令牌：命令行参数优先，其次是已保存的令牌
pub fn resolve_token(config: &AppConfig, explicit: Option<&str>) -> Option<String> {
    explicit
        .or(config.access_token.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
