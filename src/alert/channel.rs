//! Alert channel capability and the static channel registry

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::{AlertEvent, EmailChannel, SlackChannel, SmsChannel, WebhookChannel};
use crate::adapters::WebhookClient;
use crate::config::AlertsConfig;
use crate::error::Result;

/// The fixed set of delivery media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Slack,
    Sms,
    Webhook,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Email,
        ChannelKind::Slack,
        ChannelKind::Sms,
        ChannelKind::Webhook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Slack => "slack",
            ChannelKind::Sms => "sms",
            ChannelKind::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "email" | "mail" => Ok(Self::Email),
            "slack" => Ok(Self::Slack),
            "sms" => Ok(Self::Sms),
            "webhook" => Ok(Self::Webhook),
            other => Err(format!(
                "invalid channel '{other}'; expected email|slack|sms|webhook"
            )),
        }
    }
}

/// One medium able to deliver a single alert.
///
/// `is_configured` must be pure: it only inspects settings captured at
/// construction. `send` fails with `ChannelNotConfigured` when called on an
/// unconfigured channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn is_configured(&self) -> bool;

    async fn send(&self, event: &AlertEvent) -> Result<()>;
}

/// Channels selected for one event
pub struct Resolution {
    pub selected: Vec<Arc<dyn AlertChannel>>,
    /// Requested or registered channels left out because they are unconfigured
    pub skipped: Vec<ChannelKind>,
}

/// Read-only map from channel kind to channel, built once at startup
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<ChannelKind, Arc<dyn AlertChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its own kind, replacing any previous one
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    /// Build every channel variant from the alert settings
    pub fn from_config(alerts: &AlertsConfig) -> Result<Self> {
        let http = WebhookClient::new(Duration::from_millis(alerts.delivery_timeout_ms))?;

        Ok(Self::new()
            .with_channel(Arc::new(EmailChannel::new(&alerts.email)))
            .with_channel(Arc::new(SlackChannel::new(&alerts.slack, http.clone())))
            .with_channel(Arc::new(SmsChannel::new(&alerts.sms, http.clone())))
            .with_channel(Arc::new(WebhookChannel::new(&alerts.webhook, http))))
    }

    pub fn get(&self, kind: ChannelKind) -> Option<&Arc<dyn AlertChannel>> {
        self.channels.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Kinds whose channel currently reports itself configured
    pub fn configured(&self) -> Vec<ChannelKind> {
        self.channels
            .values()
            .filter(|c| c.is_configured())
            .map(|c| c.kind())
            .collect()
    }

    /// Resolve the delivery set: the explicit allow-list if given, otherwise
    /// every registered channel, keeping only configured ones.
    pub fn resolve(&self, requested: Option<&[ChannelKind]>) -> Resolution {
        let candidates: Vec<ChannelKind> = match requested {
            Some(kinds) => {
                let mut kinds = kinds.to_vec();
                kinds.sort();
                kinds.dedup();
                kinds
            }
            None => self.channels.keys().copied().collect(),
        };

        let mut selected = Vec::new();
        let mut skipped = Vec::new();
        for kind in candidates {
            match self.channels.get(&kind) {
                Some(channel) if channel.is_configured() => selected.push(Arc::clone(channel)),
                _ => skipped.push(kind),
            }
        }

        Resolution { selected, skipped }
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("configured", &self.configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertsConfig;

    fn mock(kind: ChannelKind, configured: bool) -> Arc<dyn AlertChannel> {
        let mut channel = MockAlertChannel::new();
        channel.expect_kind().return_const(kind);
        channel.expect_is_configured().return_const(configured);
        Arc::new(channel)
    }

    #[test]
    fn test_channel_kind_parsing() {
        assert_eq!("Slack".parse::<ChannelKind>(), Ok(ChannelKind::Slack));
        assert_eq!("mail".parse::<ChannelKind>(), Ok(ChannelKind::Email));
        assert!("pager".parse::<ChannelKind>().is_err());
        assert_eq!(
            serde_json::to_string(&ChannelKind::Webhook).unwrap(),
            "\"webhook\""
        );
    }

    #[test]
    fn test_resolve_defaults_to_configured_channels() {
        let registry = ChannelRegistry::new()
            .with_channel(mock(ChannelKind::Email, true))
            .with_channel(mock(ChannelKind::Slack, false));

        let resolution = registry.resolve(None);
        let selected: Vec<_> = resolution.selected.iter().map(|c| c.kind()).collect();
        assert_eq!(selected, vec![ChannelKind::Email]);
        assert_eq!(resolution.skipped, vec![ChannelKind::Slack]);
    }

    #[test]
    fn test_resolve_explicit_list_is_an_allow_list() {
        let registry = ChannelRegistry::new()
            .with_channel(mock(ChannelKind::Email, true))
            .with_channel(mock(ChannelKind::Slack, false));

        let only_slack = registry.resolve(Some(&[ChannelKind::Slack]));
        assert!(only_slack.selected.is_empty());

        // Unregistered kinds are skipped rather than erroring
        let sms = registry.resolve(Some(&[ChannelKind::Sms, ChannelKind::Sms]));
        assert!(sms.selected.is_empty());
        assert_eq!(sms.skipped, vec![ChannelKind::Sms]);
    }

    #[test]
    fn test_from_config_registers_every_variant_unconfigured() {
        let registry = ChannelRegistry::from_config(&AlertsConfig::default()).unwrap();
        assert_eq!(registry.len(), ChannelKind::ALL.len());
        assert!(registry.configured().is_empty());
    }
}
