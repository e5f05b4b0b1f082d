use crate::build::TriggerSource;
use crate::build::transcript::Transcript;
use crate::config::MailConfig;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;

pub const SUBJECT_SUCCESS: &str = "Build successful";
pub const SUBJECT_FAILURE: &str = "ERROR: Error building website";

const SMTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("邮件地址无效 {address}：{source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },

    #[error("构造邮件失败：{0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP 发送失败：{0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// 邮件投递接口
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), MailError>;
}

/// 通过 SMTP 中继发送纯文本邮件（PLAIN 认证，服务器支持时升级 STARTTLS）
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpMailer {
    pub fn new(mail: &MailConfig) -> Result<Self, MailError> {
        let from = parse_mailbox(&mail.sender)?;
        let to = mail
            .recipients
            .iter()
            .map(|r| parse_mailbox(r))
            .collect::<Result<Vec<_>, _>>()?;

        let tls = TlsParameters::new(mail.server.clone())?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&mail.server)
            .port(mail.port)
            .tls(Tls::Opportunistic(tls))
            .timeout(Some(SMTP_TIMEOUT));
        if !mail.username.is_empty() {
            builder = builder
                .credentials(Credentials::new(mail.username.clone(), mail.password.clone()))
                .authentication(vec![Mechanism::Plain]);
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|source| MailError::Address {
        address: address.to_owned(),
        source,
    })
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, subject: &str, body: &str) -> Result<(), MailError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let message = builder.body(body.to_owned())?;
        self.transport.send(message).await?;
        Ok(())
    }
}

/// 构建成功时哪些触发方式需要发邮件
#[derive(Debug, Clone, Copy, Default)]
pub struct SuccessPolicy {
    pub webhook: bool,
    pub scheduled: bool,
}

impl SuccessPolicy {
    /// 失败总是通知；成功只在对应开关打开时通知，手动构建成功不通知
    pub fn should_send(&self, source: TriggerSource, ok: bool) -> bool {
        if !ok {
            return true;
        }
        match source {
            TriggerSource::Webhook => self.webhook,
            TriggerSource::Scheduled => self.scheduled,
            TriggerSource::Manual => false,
        }
    }
}

/// 通知阶段：尽力而为，任何失败只记录日志
#[derive(Clone, Default)]
pub struct Notifier {
    mailer: Option<Arc<dyn Mailer>>,
    policy: SuccessPolicy,
}

impl Notifier {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(mailer: Arc<dyn Mailer>, policy: SuccessPolicy) -> Self {
        Self {
            mailer: Some(mailer),
            policy,
        }
    }

    pub fn from_config(mail: Option<&MailConfig>) -> Result<Self, MailError> {
        let Some(mail) = mail else {
            return Ok(Self::disabled());
        };
        let policy = SuccessPolicy {
            webhook: mail.notify_webhook_success,
            scheduled: mail.notify_scheduled_success,
        };
        Ok(Self::new(Arc::new(SmtpMailer::new(mail)?), policy))
    }

    pub fn is_configured(&self) -> bool {
        self.mailer.is_some()
    }

    pub async fn notify(&self, transcript: Transcript, source: TriggerSource, ok: bool) {
        let Some(mailer) = self.mailer.as_ref() else {
            return;
        };
        if !self.policy.should_send(source, ok) {
            tracing::debug!("构建成功，{source} 触发的成功通知未开启，不发送邮件");
            return;
        }

        let subject = if ok { SUBJECT_SUCCESS } else { SUBJECT_FAILURE };
        tracing::info!("发送构建通知邮件：{subject}");
        if let Err(e) = mailer.send(subject, &transcript.into_body()).await {
            tracing::error!("发送通知邮件失败：{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingMailer;

    #[test]
    fn failures_are_always_sent() {
        let policy = SuccessPolicy::default();
        for source in [TriggerSource::Webhook, TriggerSource::Scheduled, TriggerSource::Manual] {
            assert!(policy.should_send(source, false));
        }
    }

    #[test]
    fn success_mail_is_opt_in_per_source() {
        let policy = SuccessPolicy {
            webhook: true,
            scheduled: false,
        };
        assert!(policy.should_send(TriggerSource::Webhook, true));
        assert!(!policy.should_send(TriggerSource::Scheduled, true));
        assert!(!policy.should_send(TriggerSource::Manual, true));

        let policy = SuccessPolicy {
            webhook: false,
            scheduled: true,
        };
        assert!(!policy.should_send(TriggerSource::Webhook, true));
        assert!(policy.should_send(TriggerSource::Scheduled, true));
    }

    #[tokio::test]
    async fn unconfigured_notifier_sends_nothing() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_configured());
        notifier
            .notify(Transcript::new(false), TriggerSource::Webhook, false)
            .await;
    }

    #[tokio::test]
    async fn failure_mail_carries_transcript() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(mailer.clone(), SuccessPolicy::default());

        let mut transcript = Transcript::new(true);
        transcript.info("building main...");
        transcript.error("error during checkout");
        notifier.notify(transcript, TriggerSource::Scheduled, false).await;

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, SUBJECT_FAILURE);
        assert_eq!(sent[0].1, "building main...\nerror during checkout\n");
    }

    #[tokio::test]
    async fn success_mail_respects_policy() {
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(
            mailer.clone(),
            SuccessPolicy {
                webhook: true,
                scheduled: false,
            },
        );

        notifier.notify(Transcript::new(true), TriggerSource::Scheduled, true).await;
        assert!(mailer.sent().is_empty());

        notifier.notify(Transcript::new(true), TriggerSource::Webhook, true).await;
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, SUBJECT_SUCCESS);
    }

    #[tokio::test]
    async fn delivery_errors_are_swallowed() {
        let mailer = Arc::new(RecordingMailer::failing());
        let notifier = Notifier::new(mailer.clone(), SuccessPolicy::default());

        notifier.notify(Transcript::new(true), TriggerSource::Webhook, false).await;
        assert_eq!(mailer.attempts(), 1);
    }

    #[test]
    fn smtp_mailer_rejects_bad_addresses() {
        let mail = MailConfig {
            server: "smtp.example.com".into(),
            port: 587,
            username: String::new(),
            password: String::new(),
            sender: "not an address".into(),
            recipients: vec!["ops@example.com".into()],
            notify_webhook_success: false,
            notify_scheduled_success: false,
        };
        assert!(matches!(
            SmtpMailer::new(&mail),
            Err(MailError::Address { .. })
        ));
    }
}
