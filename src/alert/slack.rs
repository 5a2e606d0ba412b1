//! Team-chat webhook alert channel

use async_trait::async_trait;
use serde::Serialize;

use super::{AlertChannel, AlertEvent, ChannelKind};
use crate::adapters::WebhookClient;
use crate::config::SlackSettings;
use crate::error::{GuardError, Result};

#[derive(Serialize)]
struct SlackMessage {
    text: String,
}

pub struct SlackChannel {
    webhook_url: Option<String>,
    http: WebhookClient,
}

impl SlackChannel {
    pub fn new(settings: &SlackSettings, http: WebhookClient) -> Self {
        Self {
            webhook_url: settings.webhook_url.clone().filter(|u| !u.is_empty()),
            http,
        }
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or(GuardError::ChannelNotConfigured(ChannelKind::Slack))?;

        let message = SlackMessage {
            text: event.format_text(),
        };
        self.http
            .post_json(url, &message)
            .await
            .map_err(|reason| GuardError::ChannelDelivery {
                channel: ChannelKind::Slack,
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::test_support::capture_server;
    use axum::http::StatusCode;
    use std::time::Duration;

    fn http() -> WebhookClient {
        WebhookClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_posts_text_payload() {
        let (url, received) = capture_server(StatusCode::OK).await;
        let channel = SlackChannel::new(
            &SlackSettings {
                webhook_url: Some(url),
            },
            http(),
        );
        assert!(channel.is_configured());

        channel.send(&AlertEvent::database_recovered()).await.unwrap();

        let bodies = received.lock().await;
        assert_eq!(bodies.len(), 1);
        let text = bodies[0]["text"].as_str().unwrap();
        assert!(text.contains("DATABASE_RECOVERED"));
        assert!(text.contains("Database connection has been restored"));
    }

    #[tokio::test]
    async fn test_empty_url_is_unconfigured() {
        let channel = SlackChannel::new(
            &SlackSettings {
                webhook_url: Some(String::new()),
            },
            http(),
        );
        assert!(!channel.is_configured());
        assert!(matches!(
            channel.send(&AlertEvent::database_recovered()).await,
            Err(GuardError::ChannelNotConfigured(ChannelKind::Slack))
        ));
    }

    #[tokio::test]
    async fn test_http_error_maps_to_delivery_error() {
        let (url, _) = capture_server(StatusCode::FORBIDDEN).await;
        let channel = SlackChannel::new(&SlackSettings { webhook_url: Some(url) }, http());

        let err = channel
            .send(&AlertEvent::database_down("x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GuardError::ChannelDelivery { channel: ChannelKind::Slack, .. }
        ));
    }
}
