//! 测试用的假命令执行器、邮件记录器与配置

use crate::build::runner::{CommandOutput, CommandRunner, EnvVars};
use crate::config::Config;
use crate::notify::{MailError, Mailer, Notifier, SuccessPolicy};
use crate::state::AppState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Notify, Semaphore};

pub const TEST_SECRET: &str = "s3cret";
pub const GENERATOR: &str = "hugo";

/// 以 `root` 为根的测试配置：live=main，beta=staging
pub fn test_config(root: &Path) -> Config {
    test_config_with(root, &[])
}

/// 在测试配置之上追加（覆盖）配置项
pub fn test_config_with(root: &Path, extra: &[(&str, &str)]) -> Config {
    let path = |p: &str| root.join(p).display().to_string();
    let mut vars = vec![
        ("REPO_URL".to_string(), "https://example.com/site.git".to_string()),
        ("CHECKOUT_DIR".to_string(), path("work")),
        ("LIVE_OUTPUT_DIR".to_string(), path("live")),
        ("BETA_OUTPUT_DIR".to_string(), path("beta")),
        ("GIT_BIN".to_string(), "git".to_string()),
        ("GENERATOR_BIN".to_string(), GENERATOR.to_string()),
        ("LIVE_BRANCH".to_string(), "main".to_string()),
        ("LIVE_BASE_URL".to_string(), "https://example.com/".to_string()),
        ("BETA_BRANCH".to_string(), "staging".to_string()),
        ("BETA_BASE_URL".to_string(), "https://beta.example.com/".to_string()),
        ("GITHUB_SEC_TOKEN".to_string(), TEST_SECRET.to_string()),
    ];
    vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    Config::from_vars(vars).expect("测试配置应当有效")
}

#[derive(Debug, Clone)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
    pub env: Vec<(String, String)>,
}

struct Hold {
    entered: Notify,
    release: Semaphore,
}

/// 记录调用并按 "程序 第一个参数" 返回预设结果，默认成功且无输出
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Call>>,
    responses: Mutex<HashMap<String, CommandOutput>>,
    hold: Option<Hold>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, key: &str, output: CommandOutput) -> Self {
        self.set_response(key, output);
        self
    }

    pub fn set_response(&self, key: &str, output: CommandOutput) {
        self.responses.lock().unwrap().insert(key.to_owned(), output);
    }

    /// 站点生成器调用会阻塞，直到 `release_generator`
    pub fn hold_generator(mut self) -> Self {
        self.hold = Some(Hold {
            entered: Notify::new(),
            release: Semaphore::new(0),
        });
        self
    }

    pub async fn wait_for_generator(&self) {
        if let Some(hold) = &self.hold {
            hold.entered.notified().await;
        }
    }

    pub fn release_generator(&self) {
        if let Some(hold) = &self.hold {
            hold.release.add_permits(1);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| format!("{} {}", c.program, c.args.join(" ")))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        dir: &Path,
        env: EnvVars<'_>,
    ) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(Call {
            program: program.to_owned(),
            args: args.to_vec(),
            dir: dir.to_path_buf(),
            env: env.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        });

        if program == GENERATOR
            && let Some(hold) = &self.hold
        {
            hold.entered.notify_one();
            hold.release
                .acquire()
                .await
                .map_err(io::Error::other)?
                .forget();
        }

        let key = format!("{program} {}", args.first().map(String::as_str).unwrap_or(""));
        let response = self.responses.lock().unwrap().get(&key).cloned();
        Ok(response.unwrap_or(CommandOutput {
            success: true,
            code: Some(0),
            output: String::new(),
        }))
    }
}

/// 记录发出的 (主题, 正文)
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, subject: &str, body: &str) -> Result<(), MailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            let source = "broken".parse::<lettre::message::Mailbox>().unwrap_err();
            return Err(MailError::Address {
                address: "broken".into(),
                source,
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_owned(), body.to_owned()));
        Ok(())
    }
}

/// 使用假执行器与记录邮件器组装的应用状态（成功通知全部关闭）
pub fn test_state(
    root: &Path,
    runner: FakeRunner,
) -> (AppState, Arc<FakeRunner>, Arc<RecordingMailer>) {
    test_state_with(test_config(root), runner)
}

pub fn test_state_with(
    config: Config,
    runner: FakeRunner,
) -> (AppState, Arc<FakeRunner>, Arc<RecordingMailer>) {
    let runner = Arc::new(runner);
    let mailer = Arc::new(RecordingMailer::default());
    let notifier = Notifier::new(mailer.clone(), SuccessPolicy::default());
    let state = AppState::with_parts(Arc::new(config), runner.clone(), notifier);
    (state, runner, mailer)
}
