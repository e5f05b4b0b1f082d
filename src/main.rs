use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod build;
mod check;
mod config;
mod health;
mod notify;
mod scheduler;
mod server;
mod state;
mod webhook;

#[cfg(test)]
mod test_support;

use build::{BuildOutcome, TriggerSource};
use config::{Config, LogFormat};

#[derive(Parser)]
#[command(name = "sitehook", about = "静态站点自动部署服务", version)]
struct Cli {
    /// 配置文件（TOML，键名与环境变量相同的小写形式），环境变量优先
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动 Webhook 服务和定时构建
    Serve,

    /// 立即构建一次指定目标
    Build {
        #[arg(value_enum)]
        target: TargetName,
    },

    /// 检查配置和运行环境
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetName {
    Live,
    Beta,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);

    // 配置加载失败时也先初始化日志，再返回错误
    let loaded = Config::load(cli.config.as_deref());
    let (level, format) = match &loaded {
        Ok(c) => (c.log.level.clone(), c.log.format),
        Err(_) => ("info".to_string(), LogFormat::Text),
    };
    init_tracing(&level, format);
    let config = loaded?;

    match command {
        Commands::Serve => {
            tracing::info!(
                repo = %config.repo_url,
                live = %config.live.branch,
                beta = %config.beta.branch,
                "sitehook {} 启动",
                env!("CARGO_PKG_VERSION")
            );
            runtime()?.block_on(async move {
                let state = state::AppState::new(config)?;
                server::run(state).await
            })?;
        }
        Commands::Build { target } => {
            let target = match target {
                TargetName::Live => config.live.clone(),
                TargetName::Beta => config.beta.clone(),
            };
            let outcome = runtime()?.block_on(async {
                let state = state::AppState::new(config)?;
                anyhow::Ok(state.deployer.attempt_build(TriggerSource::Manual, &target).await)
            })?;
            if outcome != BuildOutcome::Succeeded {
                anyhow::bail!("构建 {} 失败", target.branch);
            }
        }
        Commands::Check => {
            let result = check::run(&config);

            for w in &result.warnings {
                tracing::warn!("{w}");
            }
            for e in &result.errors {
                tracing::error!("{e}");
            }

            if result.errors.is_empty() {
                tracing::info!("检查通过（{} 个警告）", result.warnings.len());
            } else {
                anyhow::bail!(
                    "检查未通过：{} 个错误，{} 个警告",
                    result.errors.len(),
                    result.warnings.len()
                );
            }
        }
    }

    Ok(())
}

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

/// RUST_LOG 优先，其次使用配置中的日志级别
fn init_tracing(default_level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
