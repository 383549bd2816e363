use crate::auth::{
    detect_presenter, HttpAuthApi, HttpTokenStore, LoginMode, MemoryTokenStore, SessionManager,
    TokenStore, UrlPresenter,
};
use crate::config::AppConfig;
use crate::error::AuthError;
use anyhow::Context;
use clap::Args;
use dialoguer::{Input, Password};
use std::sync::Arc;
use tracing::info;

/// `login` 子命令参数
#[derive(Debug, Clone, Default, Args)]
pub struct LoginArgs {
    /// 直接使用已有的访问令牌
    #[arg(long)]
    pub token: Option<String>,

    /// 交互输入用户名和密码
    #[arg(long)]
    pub prompt: bool,

    /// 只打印令牌，不写入配置文件
    #[arg(long)]
    pub dont_save: bool,
}

/// 登录结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// 已保存的令牌仍然有效，什么都没做
    AlreadyLoggedIn { username: String },
    LoggedIn { username: String, saved: bool },
}

pub async fn run(config: &AppConfig, args: LoginArgs) -> anyhow::Result<()> {
    // 选项冲突要在连网之前报出来
    LoginMode::select(args.token.clone(), args.prompt)?;

    let store: Arc<dyn TokenStore> = match config.remote.auth_url.as_deref() {
        Some(url) => Arc::new(HttpTokenStore::new(url)?),
        None => Arc::new(MemoryTokenStore::new()),
    };
    let api = Arc::new(HttpAuthApi::new(&config.remote)?);
    let manager = SessionManager::new(config.remote.clone(), store, api);
    let presenter = detect_presenter();

    execute(config, &args, &manager, presenter.as_ref(), prompt_credentials).await?;
    Ok(())
}

/// 按选定的方式登录，拿到的令牌校验通过后保存或打印
pub async fn execute<F>(
    config: &AppConfig,
    args: &LoginArgs,
    manager: &SessionManager,
    presenter: &dyn UrlPresenter,
    ask_credentials: F,
) -> anyhow::Result<LoginOutcome>
where
    F: FnOnce() -> anyhow::Result<(String, String)>,
{
    let mode = LoginMode::select(args.token.clone(), args.prompt)?;

    let token = match mode {
        LoginMode::Token(token) => token,
        LoginMode::Credentials => {
            let (username, password) = ask_credentials()?;
            manager
                .authenticate_with_credentials(&username, &password)
                .await?
        }
        LoginMode::AuthorizationCode => {
            if let Some(saved) = config.access_token.as_deref() {
                if let Some(username) = manager.verify_token(saved).await? {
                    println!("已经以 {} 的身份登录", username);
                    return Ok(LoginOutcome::AlreadyLoggedIn { username });
                }
                info!("已保存的令牌无效，重新授权");
            }
            manager.start_authorization_code_flow(presenter).await?
        }
    };

    let username = manager
        .verify_token(&token)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    if args.dont_save {
        println!("{}", token);
    } else {
        config
            .save_token(&token)
            .with_context(|| format!("保存令牌到 {:?} 失败", config.config_dir))?;
        println!("登录成功，当前用户: {}", username);
    }

    Ok(LoginOutcome::LoggedIn {
        username,
        saved: !args.dont_save,
    })
}

fn prompt_credentials() -> anyhow::Result<(String, String)> {
    let username: String = Input::new()
        .with_prompt("put.io 用户名")
        .interact_text()?;
    let password = Password::new().with_prompt("密码").interact()?;
    Ok((username, password))
}
