use crate::build::{BranchTarget, DispatchMode};
use crate::scheduler::CronSpec;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 进程配置：启动时构建一次，之后以 `Arc<Config>` 只读共享
#[derive(Debug)]
pub struct Config {
    pub repo_url: String,
    pub checkout_dir: PathBuf,
    pub git_bin: String,
    pub generator_bin: String,
    /// 外部命令超时，`None` 表示不限时
    pub command_timeout: Option<Duration>,
    pub live: BranchTarget,
    pub beta: BranchTarget,
    pub webhook_secret: String,
    pub bind_address: String,
    pub live_cron: Option<CronSpec>,
    pub beta_cron: Option<CronSpec>,
    /// 未配置 SMTP 服务器或收件人时为 `None`
    pub mail: Option<MailConfig>,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
    pub recipients: Vec<String>,
    /// Webhook 触发的构建成功时是否也发邮件
    pub notify_webhook_success: bool,
    /// 定时触发的构建成功时是否也发邮件
    pub notify_scheduled_success: bool,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("缺少必需配置项 {0}")]
    Missing(&'static str),

    #[error("配置项 {key} 的值无效：{value}（{reason}）")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("读取配置文件 {path} 失败：{source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("解析配置文件 {path} 失败：{source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("配置项格式错误：{0}")]
    Extract(#[from] toml::de::Error),
}

/// 原始配置项：TOML 文件（原生类型）与环境变量（字符串）合并后反序列化，
/// 之后再校验并组装成 [`Config`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct Settings {
    repo_url: Option<String>,
    live_branch: Option<String>,
    live_base_url: Option<String>,
    beta_branch: Option<String>,
    beta_base_url: Option<String>,
    github_sec_token: Option<String>,
    #[serde(default = "default_bind_address")]
    bind_address: String,
    live_build_cron: Option<String>,
    beta_build_cron: Option<String>,

    #[serde(default = "default_checkout_dir")]
    checkout_dir: PathBuf,
    #[serde(default = "default_live_output_dir")]
    live_output_dir: PathBuf,
    #[serde(default = "default_beta_output_dir")]
    beta_output_dir: PathBuf,
    #[serde(default = "default_git_bin")]
    git_bin: String,
    #[serde(default = "default_generator_bin")]
    generator_bin: String,
    #[serde(default = "default_command_timeout_secs", deserialize_with = "parsed")]
    command_timeout_secs: u64,
    live_webhook_dispatch: Option<String>,
    beta_webhook_dispatch: Option<String>,

    mail_smtp_server: Option<String>,
    #[serde(default = "default_smtp_port", deserialize_with = "parsed")]
    mail_smtp_port: u16,
    #[serde(default)]
    mail_smtp_username: String,
    #[serde(default)]
    mail_smtp_password: String,
    mail_sender: Option<String>,
    #[serde(default, deserialize_with = "recipients")]
    mail_recipients: Vec<String>,
    #[serde(default, deserialize_with = "flag")]
    mail_push_success: bool,
    #[serde(default, deserialize_with = "flag")]
    mail_cron_success: bool,

    #[serde(default = "default_log_level")]
    log_level: String,
    log_format: Option<String>,
}

impl Config {
    /// 加载配置：可选的 TOML 文件（键名小写）打底，环境变量（键名大写）覆盖
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let table = match file {
            Some(path) => read_file(path)?,
            None => toml::Table::new(),
        };
        let env = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        Self::from_sources(table, env)
    }

    #[cfg(test)]
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::from_sources(toml::Table::new(), vars)
    }

    /// `vars` 覆盖 `table` 中的同名项，空白值视为未设置
    fn from_sources<I, K, V>(mut table: toml::Table, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let value: String = value.into();
            let value = value.trim();
            if !value.is_empty() {
                table.insert(key.into(), toml::Value::String(value.to_owned()));
            }
        }
        let settings: Settings = toml::Value::Table(table).try_into()?;
        Self::from_settings(settings)
    }

    fn from_settings(s: Settings) -> Result<Self, ConfigError> {
        let live = BranchTarget {
            name: "live".into(),
            branch: required("LIVE_BRANCH", s.live_branch)?,
            output_dir: s.live_output_dir,
            base_url: required("LIVE_BASE_URL", s.live_base_url)?,
            include_drafts: false,
            webhook_dispatch: parse_setting("LIVE_WEBHOOK_DISPATCH", s.live_webhook_dispatch)?
                .unwrap_or(DispatchMode::Sync),
        };
        let beta = BranchTarget {
            name: "beta".into(),
            branch: required("BETA_BRANCH", s.beta_branch)?,
            output_dir: s.beta_output_dir,
            base_url: required("BETA_BASE_URL", s.beta_base_url)?,
            include_drafts: true,
            webhook_dispatch: parse_setting("BETA_WEBHOOK_DISPATCH", s.beta_webhook_dispatch)?
                .unwrap_or(DispatchMode::Async),
        };

        let mail = match (s.mail_smtp_server, s.mail_recipients.is_empty()) {
            (Some(server), false) => Some(MailConfig {
                server,
                port: s.mail_smtp_port,
                username: s.mail_smtp_username,
                password: s.mail_smtp_password,
                sender: required("MAIL_SENDER", s.mail_sender)?,
                recipients: s.mail_recipients,
                notify_webhook_success: s.mail_push_success,
                notify_scheduled_success: s.mail_cron_success,
            }),
            _ => None,
        };

        Ok(Self {
            repo_url: required("REPO_URL", s.repo_url)?,
            checkout_dir: s.checkout_dir,
            git_bin: s.git_bin,
            generator_bin: s.generator_bin,
            command_timeout: (s.command_timeout_secs > 0)
                .then(|| Duration::from_secs(s.command_timeout_secs)),
            live,
            beta,
            webhook_secret: required("GITHUB_SEC_TOKEN", s.github_sec_token)?,
            bind_address: s.bind_address,
            live_cron: cron("LIVE_BUILD_CRON", s.live_build_cron)?,
            beta_cron: cron("BETA_BUILD_CRON", s.beta_build_cron)?,
            mail,
            log: LogConfig {
                level: s.log_level,
                format: parse_setting("LOG_FORMAT", s.log_format)?.unwrap_or(LogFormat::Text),
            },
        })
    }

    /// 根据分支名匹配构建目标，beta 优先
    pub fn target_for_branch(&self, branch: &str) -> Option<&BranchTarget> {
        if branch == self.beta.branch {
            Some(&self.beta)
        } else if branch == self.live.branch {
            Some(&self.live)
        } else {
            None
        }
    }
}

fn required(key: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    value.ok_or(ConfigError::Missing(key))
}

fn parse_setting<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .map(|raw| {
            raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value: raw,
            })
        })
        .transpose()
}

fn cron(key: &'static str, value: Option<String>) -> Result<Option<CronSpec>, ConfigError> {
    value
        .map(|raw| {
            CronSpec::parse(&raw).map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value: raw,
            })
        })
        .transpose()
}

/// 逗号分隔的收件人列表，去除首尾空白并丢弃空项
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// 与常见布尔写法兼容：1/t/true 与 0/f/false（大小写不敏感）
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

/// 读取 TOML 文件，键名统一转为大写，空白字符串视为未设置
fn read_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let table: toml::Table = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    Ok(table
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                toml::Value::String(s) if s.trim().is_empty() => return None,
                toml::Value::String(s) => toml::Value::String(s.trim().to_owned()),
                other => other,
            };
            Some((key.to_ascii_uppercase(), value))
        })
        .collect())
}

/// 文件里是原生类型，环境变量里总是字符串
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s,
        }
    }
}

fn parsed<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = Scalar::deserialize(de)?.into_string();
    raw.parse()
        .map_err(|e| de::Error::custom(format!("无效的值 {raw}（{e}）")))
}

/// 无法识别的布尔值按 false 处理并记录警告
fn flag<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    let raw = match Scalar::deserialize(de)? {
        Scalar::Bool(b) => return Ok(b),
        other => other.into_string(),
    };
    Ok(parse_bool(&raw).unwrap_or_else(|| {
        tracing::warn!("{raw} 不是有效的布尔值，按 false 处理");
        false
    }))
}

/// 收件人可以是逗号分隔的字符串，也可以是 TOML 数组
fn recipients<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Text(String),
    }

    Ok(match Raw::deserialize(de)? {
        Raw::List(list) => list
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(str::to_owned)
            .collect(),
        Raw::Text(raw) => parse_recipients(&raw),
    })
}

fn default_bind_address() -> String { "0.0.0.0:8080".into() }
fn default_checkout_dir() -> PathBuf { "/data".into() }
fn default_live_output_dir() -> PathBuf { "/live".into() }
fn default_beta_output_dir() -> PathBuf { "/beta".into() }
fn default_git_bin() -> String { "git".into() }
fn default_generator_bin() -> String { "/app/hugo".into() }
fn default_command_timeout_secs() -> u64 { 1800 }
fn default_smtp_port() -> u16 { 587 }
fn default_log_level() -> String { "info".into() }

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("不支持的日志格式 {other}，可选 text / json")),
        }
    }
}
