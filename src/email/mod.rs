use anyhow::Context;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::SmtpConfig;

/// A composed message ready for delivery.
#[derive(Clone, Debug)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingEmail) -> anyhow::Result<()>;
}

/// Stub used when no SMTP relay is configured.
#[derive(Clone, Debug)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingEmail) -> anyhow::Result<()> {
        info!(to = %mail.to, subject = %mail.subject, "mail send stub");
        Ok(())
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        let from = config
            .from
            .parse::<Mailbox>()
            .context("invalid SMTP_FROM address")?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingEmail) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(mail.to.parse::<Mailbox>().context("invalid recipient")?)
            .subject(mail.subject.clone())
            .body(mail.body.clone())?;
        self.transport.send(message).await?;
        Ok(())
    }
}

pub fn confirmation_email(base_url: &str, to: &str, token: &str) -> OutgoingEmail {
    let link = format!(
        "{}/api/v1/users/confirm?c={token}",
        base_url.trim_end_matches('/')
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: "Confirm your account".into(),
        body: format!(
            "Welcome! Please confirm your email address by opening the link below:\n\n{link}\n\n\
             If you did not create this account, you can ignore this message.\n"
        ),
    }
}

pub fn password_reset_email(base_url: &str, to: &str, token: &str) -> OutgoingEmail {
    let link = format!(
        "{}/api/v1/users/reset?r={token}",
        base_url.trim_end_matches('/')
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: "Reset your password".into(),
        body: format!(
            "A password reset was requested for your account. Open the link below to choose \
             a new password:\n\n{link}\n\n\
             If you did not request this, you can ignore this message.\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let mail = OutgoingEmail {
            to: "someone@mail.utoronto.ca".into(),
            subject: "hi".into(),
            body: "hello".into(),
        };
        LogMailer.send(&mail).await.expect("log mailer send");
    }

    #[test]
    fn confirmation_link_targets_confirm_endpoint() {
        let mail = confirmation_email("http://localhost:8080/", "a@mail.utoronto.ca", "tok123");
        assert!(mail
            .body
            .contains("http://localhost:8080/api/v1/users/confirm?c=tok123"));
        assert_eq!(mail.to, "a@mail.utoronto.ca");
    }

    #[test]
    fn reset_link_targets_reset_endpoint() {
        let mail = password_reset_email("http://localhost:8080", "a@mail.utoronto.ca", "tok456");
        assert!(mail
            .body
            .contains("http://localhost:8080/api/v1/users/reset?r=tok456"));
    }
}
