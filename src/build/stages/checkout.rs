use crate::build::runner::{CommandOutput, CommandRunner};
use crate::config::Config;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    /// 工作目录有未提交的修改或已损坏，需要人工处理，不会强制重置
    #[error("工作目录状态异常，请检查 git 目录：{0}")]
    RepositoryState(String),

    #[error("git {step} 失败（{status}）：{output}")]
    Vcs {
        step: &'static str,
        status: String,
        output: String,
    },

    #[error("无法执行 git {step}：{source}")]
    Spawn {
        step: &'static str,
        source: std::io::Error,
    },

    #[error("无法创建工作目录 {path}：{source}")]
    Workdir {
        path: String,
        source: std::io::Error,
    },
}

const NOT_A_REPOSITORY: &str = "not a git repository";

/// 固定 git 输出语言，`NOT_A_REPOSITORY` 的匹配不受系统语言影响
const GIT_ENV: &[(&str, &str)] = &[("LC_ALL", "C")];

/// 确保工作目录是仓库的克隆，切换到指定分支并拉取最新提交
///
/// 顺序：status →（非仓库时）clone → checkout → pull，任一步失败即中止。
pub async fn ensure_branch(
    runner: &dyn CommandRunner,
    config: &Config,
    branch: &str,
) -> Result<(), CheckoutError> {
    let dir = config.checkout_dir.as_path();
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| CheckoutError::Workdir {
            path: dir.display().to_string(),
            source,
        })?;

    let status = git(
        runner,
        config,
        dir,
        "status",
        &["status", "--porcelain=v1", "--untracked-files=no"],
    )
    .await?;

    if !status.success {
        if status.output.contains(NOT_A_REPOSITORY) {
            tracing::info!("工作目录还不是仓库，开始克隆：{}", config.repo_url);
            // 在工作目录内克隆到当前目录，相对路径配置同样适用
            let clone = git(runner, config, dir, "clone", &["clone", &config.repo_url, "."]).await?;
            ensure_success("clone", clone)?;
        } else {
            tracing::warn!("git status 失败，请检查 git 目录：{}", status.output.trim());
            return Err(CheckoutError::RepositoryState(format!(
                "{}\n{}",
                status.output.trim(),
                status.status_text()
            )));
        }
    } else if !status.output.trim().is_empty() {
        tracing::warn!("工作目录存在未提交的修改，请检查 git 目录");
        return Err(CheckoutError::RepositoryState(format!(
            "存在未提交的修改：\n{}",
            status.output.trim_end()
        )));
    }

    let checkout = git(runner, config, dir, "checkout", &["checkout", branch]).await?;
    ensure_success("checkout", checkout)?;

    let pull = git(runner, config, dir, "pull", &["pull"]).await?;
    ensure_success("pull", pull)?;

    Ok(())
}

async fn git(
    runner: &dyn CommandRunner,
    config: &Config,
    dir: &Path,
    step: &'static str,
    args: &[&str],
) -> Result<CommandOutput, CheckoutError> {
    let args: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
    runner
        .run(&config.git_bin, &args, dir, GIT_ENV)
        .await
        .map_err(|source| CheckoutError::Spawn { step, source })
}

fn ensure_success(step: &'static str, out: CommandOutput) -> Result<(), CheckoutError> {
    if out.success {
        return Ok(());
    }
    Err(CheckoutError::Vcs {
        step,
        status: out.status_text(),
        output: out.output.trim().to_owned(),
    })
}
