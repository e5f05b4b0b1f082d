use crate::config::Config;
use crate::notify::SmtpMailer;
use std::path::Path;

pub struct CheckResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// 检查部署环境：构建目标、外部程序、定时任务和邮件配置
pub fn run(config: &Config) -> CheckResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    check_targets(config, &mut errors, &mut warnings);
    check_programs(config, &mut errors);
    check_schedules(config, &mut warnings);
    check_mail(config, &mut errors, &mut warnings);

    CheckResult { errors, warnings }
}

fn check_targets(config: &Config, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    if config.live.branch == config.beta.branch {
        warnings.push(format!(
            "live 与 beta 使用同一分支 {}，Webhook 只会触发 beta 构建",
            config.live.branch
        ));
    }
    if config.live.output_dir == config.beta.output_dir {
        errors.push(format!(
            "live 与 beta 的输出目录相同：{}",
            config.live.output_dir.display()
        ));
    }
    if !config.checkout_dir.exists() {
        warnings.push(format!(
            "工作目录 {} 不存在，首次构建时会创建并克隆仓库",
            config.checkout_dir.display()
        ));
    }
}

fn check_programs(config: &Config, errors: &mut Vec<String>) {
    for (label, program) in [("git", &config.git_bin), ("站点生成器", &config.generator_bin)] {
        // 只检查显式路径，裸命令名交给 PATH 解析
        let path = Path::new(program);
        if path.components().count() > 1 && !path.exists() {
            errors.push(format!("{label} 可执行文件不存在：{program}"));
        }
    }
}

fn check_schedules(config: &Config, warnings: &mut Vec<String>) {
    for (spec, target) in [(&config.live_cron, &config.live), (&config.beta_cron, &config.beta)] {
        match spec {
            Some(spec) => {
                let upcoming: Vec<String> = spec.upcoming(3).iter().map(|t| t.to_rfc3339()).collect();
                tracing::info!(
                    "{} 定时构建 {}，接下来：{}",
                    target.name,
                    spec.expression,
                    upcoming.join("，")
                );
            }
            None => warnings.push(format!("未配置 {} 的定时构建", target.name)),
        }
    }
}

fn check_mail(config: &Config, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let Some(mail) = config.mail.as_ref() else {
        warnings.push("未配置邮件通知，构建结果只记录在日志中".to_string());
        return;
    };
    if let Err(e) = SmtpMailer::new(mail) {
        errors.push(format!("邮件配置无效：{e}"));
    }
    if mail.username.is_empty() {
        warnings.push(format!("SMTP 服务器 {} 未配置用户名，将不进行认证", mail.server));
    }
}
