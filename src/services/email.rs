use anyhow::Context;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::core::config::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EmailMessage {
    pub(crate) to: String,
    pub(crate) subject: String,
    pub(crate) body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EmailAttachment {
    pub(crate) filename: String,
    pub(crate) content_type: String,
    pub(crate) bytes: Vec<u8>,
}

impl EmailAttachment {
    pub(crate) fn from_text(text: &str, filename: &str, content_type: &str) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            bytes: text.as_bytes().to_vec(),
        }
    }
}

#[async_trait]
pub(crate) trait Mailer: Send + Sync {
    async fn send(
        &self,
        message: EmailMessage,
        attachments: Vec<EmailAttachment>,
    ) -> anyhow::Result<()>;
}

pub(crate) struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Returns `None` when no SMTP relay is configured.
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        let email = settings.email();
        if !email.is_configured() {
            return Ok(None);
        }

        let from = format!("{} <{}>", email.from_name, email.from_address)
            .parse::<Mailbox>()
            .context("Invalid EMAIL_FROM_ADDRESS")?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&email.smtp_host)
            .context("Failed to create SMTP transport")?
            .port(email.smtp_port);
        if !email.username.is_empty() {
            builder = builder
                .credentials(Credentials::new(email.username.clone(), email.password.clone()));
        }

        Ok(Some(Self { transport: builder.build(), from }))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        message: EmailMessage,
        attachments: Vec<EmailAttachment>,
    ) -> anyhow::Result<()> {
        let to = message.to.parse::<Mailbox>().with_context(|| format!("Invalid recipient {}", message.to))?;

        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(message.body));
        for attachment in attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .with_context(|| format!("Invalid content type {}", attachment.content_type))?;
            parts = parts.singlepart(Attachment::new(attachment.filename).body(attachment.bytes, content_type));
        }

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject)
            .multipart(parts)
            .context("Failed to build email")?;

        self.transport.send(email).await.context("Failed to send email")?;
        tracing::info!(to = %message.to, "Email sent");
        Ok(())
    }
}

/// Logs instead of sending; used when SMTP is not configured.
#[derive(Debug, Default)]
pub(crate) struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        message: EmailMessage,
        attachments: Vec<EmailAttachment>,
    ) -> anyhow::Result<()> {
        let names: Vec<&str> = attachments.iter().map(|attachment| attachment.filename.as_str()).collect();
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            attachments = ?names,
            "SMTP not configured; email not sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn smtp_mailer_is_disabled_without_relay() {
        let _guard = test_support::env_lock();
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        assert!(SmtpMailer::from_settings(&settings).expect("mailer").is_none());
    }

    #[test]
    fn attachment_from_text_keeps_bytes() {
        let attachment = EmailAttachment::from_text("<xml/>", "TestResult.txt", "text/plain");
        assert_eq!(attachment.bytes, b"<xml/>".to_vec());
        assert_eq!(attachment.filename, "TestResult.txt");
    }

    #[tokio::test]
    async fn log_mailer_accepts_everything() {
        let message = EmailMessage {
            to: "teacher@school.test".to_string(),
            subject: "Report".to_string(),
            body: "Body".to_string(),
        };
        assert!(LogMailer.send(message, Vec::new()).await.is_ok());
    }
}
