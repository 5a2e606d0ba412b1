//! Electronic-mail alert channel

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{AlertChannel, AlertEvent, ChannelKind};
use crate::config::EmailSettings;
use crate::error::{GuardError, Result};

/// A rendered message ready for an SMTP relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Hands a rendered message to whatever relays mail
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, message: &EmailMessage) -> std::result::Result<(), String>;
}

/// Records outgoing mail in the log instead of relaying it
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, message: &EmailMessage) -> std::result::Result<(), String> {
        info!(
            smtp = %format!("{}:{}", message.smtp_host, message.smtp_port),
            from = %message.from,
            to = %message.to.join(","),
            "Sending email alert: {}",
            message.subject
        );
        Ok(())
    }
}

pub struct EmailChannel {
    settings: EmailSettings,
    transport: Arc<dyn MailTransport>,
}

impl EmailChannel {
    pub fn new(settings: &EmailSettings) -> Self {
        Self::with_transport(settings, Arc::new(LogTransport))
    }

    pub fn with_transport(settings: &EmailSettings, transport: Arc<dyn MailTransport>) -> Self {
        let mut settings = settings.clone();
        settings.to.retain(|to| !to.trim().is_empty());
        Self {
            settings,
            transport,
        }
    }

    fn render(&self, event: &AlertEvent) -> Option<EmailMessage> {
        Some(EmailMessage {
            smtp_host: self.settings.smtp_host.clone()?,
            smtp_port: self.settings.smtp_port?,
            from: self.settings.from.clone()?,
            to: self.settings.to.clone(),
            subject: event.subject(),
            body: event.format_text(),
        })
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn is_configured(&self) -> bool {
        self.settings.smtp_host.as_deref().is_some_and(|h| !h.is_empty())
            && self.settings.smtp_port.is_some()
            && self.settings.from.as_deref().is_some_and(|f| !f.is_empty())
            && !self.settings.to.is_empty()
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        if !self.is_configured() {
            return Err(GuardError::ChannelNotConfigured(ChannelKind::Email));
        }
        let message = self
            .render(event)
            .ok_or(GuardError::ChannelNotConfigured(ChannelKind::Email))?;

        self.transport
            .deliver(&message)
            .await
            .map_err(|reason| GuardError::ChannelDelivery {
                channel: ChannelKind::Email,
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(&self, message: &EmailMessage) -> std::result::Result<(), String> {
            self.sent.lock().await.push(message.clone());
            Ok(())
        }
    }

    fn settings() -> EmailSettings {
        EmailSettings {
            smtp_host: Some("smtp.internal".to_string()),
            smtp_port: Some(587),
            from: Some("alerts@example.com".to_string()),
            to: vec!["oncall@example.com".to_string()],
        }
    }

    #[test]
    fn test_is_configured_requires_every_setting() {
        assert!(EmailChannel::new(&settings()).is_configured());

        let mut missing_port = settings();
        missing_port.smtp_port = None;
        assert!(!EmailChannel::new(&missing_port).is_configured());

        let mut no_recipients = settings();
        no_recipients.to.clear();
        assert!(!EmailChannel::new(&no_recipients).is_configured());

        assert!(!EmailChannel::new(&EmailSettings::default()).is_configured());
    }

    #[tokio::test]
    async fn test_blank_recipients_are_ignored() {
        let mut blank = settings();
        blank.to = vec!["".to_string(), "  ".to_string()];
        let channel = EmailChannel::new(&blank);
        assert!(!channel.is_configured());
        assert!(matches!(
            channel.send(&AlertEvent::database_down("x")).await,
            Err(GuardError::ChannelNotConfigured(ChannelKind::Email))
        ));

        let transport = Arc::new(RecordingTransport::default());
        let mut mixed = settings();
        mixed.to.push(String::new());
        EmailChannel::with_transport(&mixed, transport.clone())
            .send(&AlertEvent::database_down("x"))
            .await
            .unwrap();
        assert_eq!(transport.sent.lock().await[0].to, vec!["oncall@example.com"]);
    }

    #[tokio::test]
    async fn test_send_renders_subject_and_body() {
        let transport = Arc::new(RecordingTransport::default());
        let channel = EmailChannel::with_transport(&settings(), transport.clone());

        channel
            .send(&AlertEvent::database_down("Database connection lost: refused"))
            .await
            .unwrap();

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "[CRITICAL] DATABASE_DOWN");
        assert!(sent[0].body.contains("connection lost: refused"));
        assert_eq!(sent[0].to, vec!["oncall@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_send_unconfigured_fails_loudly() {
        let channel = EmailChannel::new(&EmailSettings::default());
        let err = channel
            .send(&AlertEvent::database_recovered())
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::ChannelNotConfigured(ChannelKind::Email)));
        assert_eq!(err.to_string(), "email channel is not properly configured");
    }
}
