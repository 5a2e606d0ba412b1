//! Generic webhook channel: posts the alert event itself as JSON

use async_trait::async_trait;

use super::{AlertChannel, AlertEvent, ChannelKind};
use crate::adapters::WebhookClient;
use crate::config::WebhookSettings;
use crate::error::{GuardError, Result};

pub struct WebhookChannel {
    url: Option<String>,
    http: WebhookClient,
}

impl WebhookChannel {
    pub fn new(settings: &WebhookSettings, http: WebhookClient) -> Self {
        Self {
            url: settings.url.clone().filter(|u| !u.is_empty()),
            http,
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let url = self
            .url
            .as_deref()
            .ok_or(GuardError::ChannelNotConfigured(ChannelKind::Webhook))?;

        self.http
            .post_json(url, event)
            .await
            .map_err(|reason| GuardError::ChannelDelivery {
                channel: ChannelKind::Webhook,
                reason,
            })
    }
}
