use clap::{Parser, Subcommand};
use putsync_lib::commands::{login, upload};
use putsync_lib::logging::init_logging;
use putsync_lib::{app_config_dir, AppConfig};

/// 把本地文件夹上传到 put.io
#[derive(Debug, Parser)]
#[command(name = "putsync", version, about)]
struct Cli {
    /// 输出调试日志到终端
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 登录并保存访问令牌
    Login(login::LoginArgs),
    /// 上传文件夹
    Upload(upload::UploadArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_dir = app_config_dir();
    init_logging(&config_dir, cli.debug);
    let config = AppConfig::load(&config_dir);

    let result = match cli.command {
        Command::Login(args) => login::run(&config, args).await,
        Command::Upload(args) => upload::run(&config, args).await,
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        eprintln!("错误: {:#}", e);
        std::process::exit(1);
    }
}
