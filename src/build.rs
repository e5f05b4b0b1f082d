pub mod gate;
pub mod runner;
pub mod stages;
pub mod transcript;

use crate::config::Config;
use crate::notify::Notifier;
use gate::BuildGate;
use runner::CommandRunner;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use transcript::Transcript;

/// 构建触发来源，只影响成功通知策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Webhook,
    Scheduled,
    Manual,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Webhook => "webhook",
            Self::Scheduled => "cron",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Webhook 触发时是否等待构建完成再响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Sync,
    Async,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(format!("不支持的触发模式 {other}，可选 sync / async")),
        }
    }
}

/// 构建目标：分支、输出目录、站点根地址、是否包含草稿
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTarget {
    pub name: String,
    pub branch: String,
    pub output_dir: PathBuf,
    pub base_url: String,
    pub include_drafts: bool,
    pub webhook_dispatch: DispatchMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// 已有构建在执行，本次请求被丢弃
    Skipped,
    Succeeded,
    Failed,
}

/// 串行构建入口：所有触发来源都经由同一个构建门
pub struct Deployer {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    notifier: Notifier,
    gate: BuildGate,
}

impl Deployer {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>, notifier: Notifier) -> Self {
        Self {
            config,
            runner,
            notifier,
            gate: BuildGate::new(),
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_building(&self) -> bool {
        self.gate.is_busy()
    }

    /// 尝试构建：门被占用时记录日志后直接返回，不执行任何阶段也不发通知
    pub async fn attempt_build(&self, source: TriggerSource, target: &BranchTarget) -> BuildOutcome {
        let Some(permit) = self.gate.try_acquire() else {
            tracing::warn!(
                branch = %target.branch,
                %source,
                "已有构建正在进行，放弃本次构建（{}）",
                target.branch
            );
            return BuildOutcome::Skipped;
        };

        let mut transcript = Transcript::new(self.notifier.is_configured());
        let ok = self.run_pipeline(source, target, &mut transcript).await;

        // 先释放构建门再发邮件，邮件服务器慢不会阻塞下一次构建
        drop(permit);

        self.notifier.notify(transcript, source, ok).await;

        if ok {
            BuildOutcome::Succeeded
        } else {
            BuildOutcome::Failed
        }
    }

    async fn run_pipeline(
        &self,
        source: TriggerSource,
        target: &BranchTarget,
        transcript: &mut Transcript,
    ) -> bool {
        let start = std::time::Instant::now();
        transcript.info(format!("\n开始构建 {}（{}）...", target.branch, target.name));

        if let Err(e) = stages::ensure_branch(self.runner.as_ref(), &self.config, &target.branch).await {
            transcript.error(format!("检出失败：{e}"));
            return false;
        }
        tracing::info!("检出完成：{}", target.branch);

        match stages::generate(self.runner.as_ref(), &self.config, target).await {
            Ok(log) => transcript.info(log),
            Err(e) => {
                transcript.error(format!("生成站点失败：{e}"));
                return false;
            }
        }

        transcript.info(format!(
            "\n构建完成 {}（触发方式：{source}，耗时 {:.2}s）",
            target.branch,
            start.elapsed().as_secs_f64()
        ));
        true
    }
}
