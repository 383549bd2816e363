use super::resolve_token;
use crate::auth::{AuthApi, HttpAuthApi};
use crate::config::AppConfig;
use crate::core::{human_size, SyncConfig, SyncEngine, SyncEvent, SyncReport, SyncRequest};
use crate::error::SyncError;
use crate::storage::{PutioClient, RemoteFs};
use anyhow::anyhow;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// `upload` 子命令参数
#[derive(Debug, Clone, Args)]
pub struct UploadArgs {
    /// 要上传的本地文件夹
    pub folder: PathBuf,

    /// 远程父目录
    #[arg(short, long, default_value = "/")]
    pub target: String,

    /// 远程文件夹名，缺省与本地文件夹同名
    #[arg(short, long)]
    pub name: Option<String>,

    /// 替换远程已存在的同名文件夹
    #[arg(short, long)]
    pub force: bool,

    /// 显示逐个文件的进度（默认）
    #[arg(short, long, overrides_with = "quiet")]
    pub verbose: bool,

    /// 不显示逐个文件的进度
    #[arg(short, long, overrides_with = "verbose")]
    pub quiet: bool,

    /// 使用指定的访问令牌
    #[arg(long)]
    pub token: Option<String>,
}

impl UploadArgs {
    fn to_request(&self) -> SyncRequest {
        SyncRequest {
            local_root: self.folder.clone(),
            target_path: self.target.clone(),
            name_override: self.name.clone(),
            overwrite: self.force,
            verbose: self.verbose || !self.quiet,
        }
    }
}

pub async fn run(config: &AppConfig, args: UploadArgs) -> anyhow::Result<()> {
    let token = resolve_token(config, args.token.as_deref())
        .ok_or_else(|| anyhow!("尚未登录，请先运行 `putsync login`"))?;

    let username = HttpAuthApi::new(&config.remote)?
        .account_username(&token)
        .await?
        .ok_or_else(|| anyhow!("访问令牌无效，请重新运行 `putsync login`"))?;
    info!("当前用户: {}", username);

    let remote: Arc<dyn RemoteFs> = Arc::new(PutioClient::new(&config.remote, &token)?);
    execute(remote, &args, SyncConfig::default()).await?;
    Ok(())
}

/// 执行同步并在终端显示进度
pub async fn execute(
    remote: Arc<dyn RemoteFs>,
    args: &UploadArgs,
    sync_config: SyncConfig,
) -> anyhow::Result<SyncReport> {
    let engine = SyncEngine::with_config(remote, sync_config);

    let (progress_tx, mut progress_rx) = mpsc::channel::<SyncEvent>(100);
    let printer = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            if let Some(line) = describe(&event) {
                println!("{}", line);
            }
        }
    });

    let result = engine.synchronize(&args.to_request(), Some(progress_tx)).await;
    let _ = printer.await;

    match result {
        Ok(report) => {
            println!("{}", summary(&report));
            Ok(report)
        }
        Err(SyncError::PartialUploadFailure { failed, uploaded }) => {
            for f in &failed {
                eprintln!("上传失败: {} ({})", f.path.display(), f.reason);
            }
            Err(SyncError::PartialUploadFailure { failed, uploaded }.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// 进度事件对应的输出行
fn describe(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::Folder {
            path,
            created,
            replaced,
            ..
        } => {
            let action = match (*created, *replaced) {
                (_, true) => "替换目录",
                (true, _) => "创建目录",
                _ => "沿用目录",
            };
            Some(format!("{} {}", action, path))
        }
        SyncEvent::Uploading {
            path,
            index,
            total_files,
            size,
            bytes_done,
            total_bytes,
        } => {
            let mut line = String::new();
            if *index == 1 {
                line.push_str(&format!(
                    "正在上传 {} 个文件 ({})\n",
                    total_files,
                    human_size(*total_bytes)
                ));
            }
            line.push_str(&format!(
                "[{}/{}] {} ({}，已完成 {} / {})",
                index,
                total_files,
                path,
                human_size(*size),
                human_size(*bytes_done),
                human_size(*total_bytes)
            ));
            Some(line)
        }
        SyncEvent::UploadFailed { path, reason } => Some(format!("上传失败 {}: {}", path, reason)),
    }
}

fn summary(report: &SyncReport) -> String {
    format!(
        "已上传 {} 个文件 ({})，新建 {} 个目录，耗时 {:.1} 秒",
        report.files_uploaded,
        human_size(report.bytes_uploaded),
        report.folders_created,
        report.duration_ms as f64 / 1000.0
    )
}
