//! SMS alert channel backed by an HTTP gateway

use async_trait::async_trait;
use serde::Serialize;

use super::{AlertChannel, AlertEvent, ChannelKind};
use crate::adapters::WebhookClient;
use crate::config::SmsSettings;
use crate::error::{GuardError, Result};

/// Single SMS segment
const SMS_MAX_CHARS: usize = 160;

#[derive(Serialize)]
struct SmsRequest<'a> {
    to: &'a [String],
    body: String,
}

pub struct SmsChannel {
    gateway_url: Option<String>,
    recipients: Vec<String>,
    http: WebhookClient,
}

impl SmsChannel {
    pub fn new(settings: &SmsSettings, http: WebhookClient) -> Self {
        Self {
            gateway_url: settings.gateway_url.clone().filter(|u| !u.is_empty()),
            recipients: settings.to.clone(),
            http,
        }
    }
}

#[async_trait]
impl AlertChannel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    fn is_configured(&self) -> bool {
        self.gateway_url.is_some() && !self.recipients.is_empty()
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let url = match self.gateway_url.as_deref() {
            Some(url) if !self.recipients.is_empty() => url,
            _ => return Err(GuardError::ChannelNotConfigured(ChannelKind::Sms)),
        };

        let request = SmsRequest {
            to: &self.recipients,
            body: event.short_text(SMS_MAX_CHARS),
        };
        self.http
            .post_json(url, &request)
            .await
            .map_err(|reason| GuardError::ChannelDelivery {
                channel: ChannelKind::Sms,
                reason,
            })
    }
}
