use crate::build::BranchTarget;
use crate::build::runner::CommandRunner;
use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("{output}\n{status}")]
    Failed { output: String, status: String },

    #[error("无法执行站点生成器 {program}：{source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

/// 生成器参数：输出目录、站点根地址，beta 目标额外带上草稿
pub fn generator_args(target: &BranchTarget) -> Vec<String> {
    let mut args = vec![
        "-d".to_string(),
        target.output_dir.display().to_string(),
        "--baseURL".to_string(),
        target.base_url.clone(),
    ];
    if target.include_drafts {
        args.push("-D".to_string());
    }
    args
}

/// 在工作目录中运行站点生成器，成功时返回其输出作为构建日志
pub async fn generate(
    runner: &dyn CommandRunner,
    config: &Config,
    target: &BranchTarget,
) -> Result<String, GenerateError> {
    let args = generator_args(target);
    let out = runner
        .run(&config.generator_bin, &args, &config.checkout_dir, &[])
        .await
        .map_err(|source| GenerateError::Spawn {
            program: config.generator_bin.clone(),
            source,
        })?;

    if !out.success {
        return Err(GenerateError::Failed {
            status: out.status_text(),
            output: out.output,
        });
    }
    Ok(out.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::runner::CommandOutput;
    use crate::test_support::{FakeRunner, test_config};

    #[test]
    fn drafts_flag_only_for_beta() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let live = generator_args(&config.live);
        assert_eq!(
            live,
            vec![
                "-d".to_string(),
                dir.path().join("live").display().to_string(),
                "--baseURL".to_string(),
                "https://example.com/".to_string(),
            ]
        );

        let beta = generator_args(&config.beta);
        assert_eq!(beta.last().map(String::as_str), Some("-D"));
        assert!(beta.contains(&"https://beta.example.com/".to_string()));
    }

    #[tokio::test]
    async fn runs_inside_checkout_dir_and_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let runner = FakeRunner::new().respond(
            "hugo -d",
            CommandOutput {
                success: true,
                code: Some(0),
                output: "Total in 42 ms\n".into(),
            },
        );

        let log = generate(&runner, &config, &config.live).await.unwrap();

        assert_eq!(log, "Total in 42 ms\n");
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].dir, config.checkout_dir);
    }

    #[tokio::test]
    async fn nonzero_exit_carries_output_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let runner = FakeRunner::new().respond(
            "hugo -d",
            CommandOutput {
                success: false,
                code: Some(255),
                output: "Error: template not found\n".into(),
            },
        );

        let err = generate(&runner, &config, &config.beta).await.unwrap_err();
        let text = err.to_string();

        assert!(text.contains("template not found"));
        assert!(text.contains("exit status 255"));
    }
}
