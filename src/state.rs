use crate::build::Deployer;
use crate::build::runner::{CommandRunner, ProcessRunner};
use crate::config::Config;
use crate::notify::Notifier;
use anyhow::{Context, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// 构建入口，Webhook 与定时任务共用同一个构建门
    pub deployer: Arc<Deployer>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let notifier = Notifier::from_config(config.mail.as_ref()).context("初始化邮件通知失败")?;
        if !notifier.is_configured() {
            tracing::info!("未配置 SMTP 服务器或收件人，构建结果只记录到日志");
        }
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(config.command_timeout));
        Ok(Self::with_parts(Arc::new(config), runner, notifier))
    }

    pub fn with_parts(config: Arc<Config>, runner: Arc<dyn CommandRunner>, notifier: Notifier) -> Self {
        let deployer = Arc::new(Deployer::new(Arc::clone(&config), runner, notifier));
        Self { config, deployer }
    }
}
