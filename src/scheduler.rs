use crate::build::{BranchTarget, Deployer, TriggerSource};
use crate::state::AppState;
use chrono::{DateTime, Local};
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// 定时构建表达式
///
/// 接受标准 5 段 cron（分 时 日 月 周，周日为 0 或 7），内部补齐秒字段并换算
/// 星期取值；6/7 段表达式与 `@daily` 等简写原样交给 cron 解析。
#[derive(Debug, Clone)]
pub struct CronSpec {
    pub expression: String,
    schedule: cron::Schedule,
}

impl CronSpec {
    pub fn parse(expression: &str) -> Result<Self, cron::error::Error> {
        let schedule = cron::Schedule::from_str(&normalize(expression))?;
        Ok(Self {
            expression: expression.trim().to_owned(),
            schedule,
        })
    }

    pub fn next_after(&self, from: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(from).next()
    }

    pub fn upcoming(&self, count: usize) -> Vec<DateTime<Local>> {
        self.schedule.upcoming(Local).take(count).collect()
    }
}

fn normalize(expression: &str) -> String {
    let expression = expression.trim();
    if expression.starts_with('@') {
        return expression.to_owned();
    }
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return fields.join(" ");
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        shift_day_of_week(fields[4])
    )
}

/// 标准 cron 的星期为 0-6（周日为 0，7 也表示周日），cron crate 为 1-7（周日为 1）
fn shift_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(shift_day_part)
        .collect::<Vec<_>>()
        .join(",")
}

fn shift_day_part(part: &str) -> String {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };

    let shifted = match range.split_once('-') {
        Some((start, "7")) => match shift_day(start) {
            Some(start) => format!("{start}-7,1"),
            None => range.to_owned(),
        },
        Some((start, end)) => match (shift_day(start), shift_day(end)) {
            (Some(start), Some(end)) => format!("{start}-{end}"),
            _ => range.to_owned(),
        },
        None => shift_day(range)
            .map(|d| d.to_string())
            .unwrap_or_else(|| range.to_owned()),
    };

    match step {
        Some(step) => format!("{shifted}/{step}"),
        None => shifted,
    }
}

fn shift_day(raw: &str) -> Option<u8> {
    let day: u8 = raw.parse().ok()?;
    match day {
        0..=6 => Some(day + 1),
        7 => Some(1),
        _ => None,
    }
}

/// 为 live / beta 各自注册定时构建，未配置表达式的目标跳过
pub fn spawn_all(state: &AppState) -> Vec<JoinHandle<()>> {
    let config = &state.config;
    let mut jobs = Vec::new();

    for (spec, target) in [(&config.live_cron, &config.live), (&config.beta_cron, &config.beta)] {
        match spec {
            Some(spec) => {
                tracing::info!(
                    "已注册 {} 定时构建：{}（下次执行 {}）",
                    target.name,
                    spec.expression,
                    spec.upcoming(1)
                        .first()
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".into())
                );
                jobs.push(spawn_job(
                    Arc::clone(&state.deployer),
                    spec.clone(),
                    target.clone(),
                ));
            }
            None => tracing::info!("未配置 {} 的定时构建", target.name),
        }
    }

    jobs
}

/// 每次触发都在独立任务中执行构建，与 Webhook 构建经由同一个构建门竞争
pub fn spawn_job(deployer: Arc<Deployer>, spec: CronSpec, target: BranchTarget) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut from = Local::now();
        loop {
            let Some(next) = spec.next_after(&from) else {
                tracing::warn!("{} 的定时表达式 {} 没有后续触发时间", target.name, spec.expression);
                return;
            };
            let wait = (next - Local::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            // 挂起恢复后错过的触发不补跑
            from = next.max(Local::now());

            tracing::info!("定时触发 {} 构建（{}）", target.name, target.branch);
            let deployer = Arc::clone(&deployer);
            let target = target.clone();
            tokio::spawn(async move {
                deployer.attempt_build(TriggerSource::Scheduled, &target).await;
            });
        }
    })
}
