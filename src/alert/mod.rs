//! Alerting: events, channels and the fan-out dispatcher

pub mod channel;
pub mod dispatcher;
pub mod email;
pub mod event;
pub mod slack;
pub mod sms;
pub mod webhook;

pub use channel::{AlertChannel, ChannelKind, ChannelRegistry, Resolution};
pub use dispatcher::{AlertDispatcher, DeliveryReport, DispatcherConfig};
pub use email::{EmailChannel, EmailMessage, LogTransport, MailTransport};
pub use event::{AlertEvent, AlertKind, AlertLevel};
pub use slack::SlackChannel;
pub use sms::SmsChannel;
pub use webhook::WebhookChannel;

#[cfg(test)]
pub use channel::MockAlertChannel;
