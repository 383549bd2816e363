use reqwest::Url;
use tracing::{info, warn};

/// 把授权地址交给用户
pub trait UrlPresenter: Send + Sync {
    fn present(&self, url: &Url);
}

/// 只打印地址，适合无图形界面的环境
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintPresenter;

impl UrlPresenter for PrintPresenter {
    fn present(&self, url: &Url) {
        println!("请在浏览器中打开以下地址完成授权:\n\n    {}\n", url);
    }
}

/// 调用系统浏览器，失败时退回打印
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserPresenter;

impl UrlPresenter for BrowserPresenter {
    fn present(&self, url: &Url) {
        match open::that(url.as_str()) {
            Ok(()) => {
                info!("已在浏览器中打开授权页面");
                println!("已在浏览器中打开授权页面，如未自动打开请访问:\n\n    {}\n", url);
            }
            Err(e) => {
                warn!("无法打开浏览器: {}", e);
                PrintPresenter.present(url);
            }
        }
    }
}

/// 根据运行环境选择展示方式
pub fn detect_presenter() -> Box<dyn UrlPresenter> {
    if has_display(|key| std::env::var(key).ok()) {
        Box::new(BrowserPresenter)
    } else {
        Box::new(PrintPresenter)
    }
}

fn has_display(env: impl Fn(&str) -> Option<String>) -> bool {
    let set = |key: &str| env(key).is_some_and(|v| !v.is_empty());

    // SSH 会话里打开的浏览器用户看不到
    if set("SSH_CONNECTION") || set("SSH_TTY") {
        return false;
    }

    if cfg!(any(target_os = "windows", target_os = "macos")) {
        true
    } else {
        set("DISPLAY") || set("WAYLAND_DISPLAY")
    }
}
