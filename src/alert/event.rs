//! Alert events and severity levels

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ChannelKind;
use crate::error::{GuardError, Result};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Informational - recovery notices
    Info,
    /// Warning - degraded but serving
    Warning,
    /// Error - operator attention needed
    Error,
    /// Critical - service down or unable to start
    Critical,
}

impl AlertLevel {
    /// Get emoji prefix for alert level
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Info => "\u{2705}",             // check mark
            AlertLevel::Warning => "\u{26a0}\u{fe0f}", // warning icon
            AlertLevel::Error => "\u{274c}",           // red X
            AlertLevel::Critical => "\u{1f6a8}",       // police light
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type tag carried by an alert
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertKind {
    StartupFailure,
    DatabaseDown,
    DatabaseRecovered,
    Custom(String),
}

impl AlertKind {
    pub fn as_str(&self) -> &str {
        match self {
            AlertKind::StartupFailure => "STARTUP_FAILURE",
            AlertKind::DatabaseDown => "DATABASE_DOWN",
            AlertKind::DatabaseRecovered => "DATABASE_RECOVERED",
            AlertKind::Custom(tag) => tag,
        }
    }

    pub fn level(&self) -> AlertLevel {
        match self {
            AlertKind::StartupFailure | AlertKind::DatabaseDown => AlertLevel::Critical,
            AlertKind::DatabaseRecovered => AlertLevel::Info,
            AlertKind::Custom(_) => AlertLevel::Warning,
        }
    }
}

impl From<String> for AlertKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "STARTUP_FAILURE" => AlertKind::StartupFailure,
            "DATABASE_DOWN" => AlertKind::DatabaseDown,
            "DATABASE_RECOVERED" => AlertKind::DatabaseRecovered,
            _ => AlertKind::Custom(tag),
        }
    }
}

impl From<AlertKind> for String {
    fn from(kind: AlertKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single fault or recovery notification.
///
/// Created by whichever component detects the condition and consumed once by
/// the dispatcher. `channels: None` targets every configured channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<ChannelKind>>,
}

impl AlertEvent {
    /// Create a new alert stamped with the current time
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            metadata: None,
            channels: None,
        }
    }

    pub fn startup_failure(error: impl std::fmt::Display) -> Self {
        Self::new(
            AlertKind::StartupFailure,
            format!("Application failed to start: {error}"),
        )
    }

    pub fn database_down(message: impl Into<String>) -> Self {
        Self::new(AlertKind::DatabaseDown, message)
    }

    pub fn database_recovered() -> Self {
        Self::new(
            AlertKind::DatabaseRecovered,
            "Database connection has been restored",
        )
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add metadata to the alert
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Restrict delivery to an explicit channel list
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = ChannelKind>) -> Self {
        self.channels = Some(channels.into_iter().collect());
        self
    }

    pub fn level(&self) -> AlertLevel {
        self.kind.level()
    }

    /// Reject events the dispatcher cannot route
    pub fn validate(&self) -> Result<()> {
        if self.kind.as_str().trim().is_empty() {
            return Err(GuardError::InvalidAlert("alert type is empty".to_string()));
        }
        if self.message.trim().is_empty() {
            return Err(GuardError::InvalidAlert(format!(
                "{} alert has an empty message",
                self.kind
            )));
        }
        if matches!(self.channels, Some(ref channels) if channels.is_empty()) {
            return Err(GuardError::InvalidAlert(format!(
                "{} alert names an empty channel list",
                self.kind
            )));
        }
        Ok(())
    }

    pub fn subject(&self) -> String {
        format!("[{}] {}", self.level().as_str().to_uppercase(), self.kind)
    }

    /// Multi-line text body for chat and mail
    pub fn format_text(&self) -> String {
        let mut text = format!(
            "{} *{}*\n*Time:* {}\n\n{}",
            self.level().emoji(),
            self.kind,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.message
        );
        if let Some(ref metadata) = self.metadata {
            text.push_str(&format!("\n\n```{metadata}```"));
        }
        text
    }

    /// Single line, capped at `max_chars` characters
    pub fn short_text(&self, max_chars: usize) -> String {
        let line = format!("{}: {}", self.subject(), self.message);
        if line.chars().count() <= max_chars {
            return line;
        }
        let mut truncated: String = line.chars().take(max_chars.saturating_sub(1)).collect();
        truncated.push('…');
        truncated
    }

    pub(crate) fn dedup_key(&self) -> String {
        format!("{}:{}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_level_ordering() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Error);
        assert!(AlertLevel::Error < AlertLevel::Critical);
    }

    #[test]
    fn test_kind_serializes_as_tag() {
        let event = AlertEvent::database_down("Database connection lost: refused");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DATABASE_DOWN");
        assert!(json.get("channels").is_none());

        let parsed: AlertEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.kind, AlertKind::DatabaseDown);

        assert_eq!(
            AlertKind::from("DISK_FULL".to_string()),
            AlertKind::Custom("DISK_FULL".to_string())
        );
    }

    #[test]
    fn test_validate_rejects_malformed_events() {
        assert!(AlertEvent::database_recovered().validate().is_ok());
        assert!(AlertEvent::database_down("  ").validate().is_err());
        assert!(AlertEvent::database_down("x")
            .with_channels(Vec::new())
            .validate()
            .is_err());
        assert!(AlertEvent::new(AlertKind::Custom(String::new()), "x")
            .validate()
            .is_err());
    }

    #[test]
    fn test_format_text() {
        let event = AlertEvent::startup_failure("pool timed out")
            .with_metadata(serde_json::json!({ "attempts": 4 }));
        let text = event.format_text();
        assert!(text.contains("STARTUP_FAILURE"));
        assert!(text.contains("Application failed to start: pool timed out"));
        assert!(text.contains("\"attempts\":4"));
        assert_eq!(event.subject(), "[CRITICAL] STARTUP_FAILURE");
    }

    #[test]
    fn test_short_text_truncates_on_char_boundary() {
        let event = AlertEvent::database_down("é".repeat(300));
        let short = event.short_text(160);
        assert_eq!(short.chars().count(), 160);
        assert!(short.ends_with('…'));
    }
}
