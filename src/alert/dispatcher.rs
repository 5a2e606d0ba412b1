//! Alert Dispatcher
//!
//! Fans each alert out to every selected channel concurrently. Delivery is
//! all-settled: one channel failing or hanging never blocks or fails the
//! others, and never fails the caller. Optional duplicate suppression guards
//! against alert storms during sustained outages.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{AlertEvent, AlertKind, AlertLevel, ChannelKind, ChannelRegistry};
use crate::config::AlertsConfig;
use crate::error::Result;
use crate::services::Metrics;

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Channels that receive recovery notices (default: slack only)
    pub recovery_channels: Vec<ChannelKind>,
    /// Minimum interval between identical alerts; 0 disables suppression
    pub suppress_duplicates_secs: u64,
    /// Deadline for a single channel delivery
    pub delivery_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            recovery_channels: vec![ChannelKind::Slack],
            suppress_duplicates_secs: 0,
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&AlertsConfig> for DispatcherConfig {
    fn from(alerts: &AlertsConfig) -> Self {
        Self {
            recovery_channels: alerts.recovery_channels.clone(),
            suppress_duplicates_secs: alerts.suppress_duplicates_secs,
            delivery_timeout: Duration::from_millis(alerts.delivery_timeout_ms),
        }
    }
}

/// Outcome of dispatching one alert
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub event_id: Uuid,
    pub delivered: Vec<ChannelKind>,
    pub failed: Vec<(ChannelKind, String)>,
    /// Targeted but unconfigured or unregistered
    pub skipped: Vec<ChannelKind>,
    pub suppressed: bool,
}

impl DeliveryReport {
    fn empty(event_id: Uuid) -> Self {
        Self {
            event_id,
            delivered: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            suppressed: false,
        }
    }

    /// Number of channels a delivery was attempted on
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

#[derive(Debug)]
struct SuppressionState {
    last_sent: DateTime<Utc>,
    suppressed_count: u32,
}

pub struct AlertDispatcher {
    config: DispatcherConfig,
    registry: Arc<ChannelRegistry>,
    recent: RwLock<HashMap<String, SuppressionState>>,
    metrics: Option<Arc<Metrics>>,
    event_tx: broadcast::Sender<AlertEvent>,
}

impl AlertDispatcher {
    pub fn new(registry: Arc<ChannelRegistry>, config: DispatcherConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            config,
            registry,
            recent: RwLock::new(HashMap::new()),
            metrics: None,
            event_tx,
        }
    }

    pub fn with_defaults(registry: Arc<ChannelRegistry>) -> Self {
        Self::new(registry, DispatcherConfig::default())
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribe to every accepted alert, suppressed or not
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.event_tx.subscribe()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    async fn should_suppress(&self, event: &AlertEvent) -> bool {
        if self.config.suppress_duplicates_secs == 0 {
            return false;
        }

        let key = event.dedup_key();
        let now = Utc::now();
        let mut recent = self.recent.write().await;

        if let Some(state) = recent.get_mut(&key) {
            let elapsed = now.signed_duration_since(state.last_sent).num_seconds();
            if elapsed >= 0 && (elapsed as u64) < self.config.suppress_duplicates_secs {
                state.suppressed_count += 1;
                debug!(
                    "Suppressing duplicate {} alert ({} suppressed)",
                    event.kind, state.suppressed_count
                );
                return true;
            }
            state.last_sent = now;
            state.suppressed_count = 0;
        } else {
            recent.insert(
                key,
                SuppressionState {
                    last_sent: now,
                    suppressed_count: 0,
                },
            );
        }

        // A state transition opens a fresh window for the opposite alert
        let opposite = match event.kind {
            AlertKind::DatabaseRecovered => Some(AlertKind::DatabaseDown),
            AlertKind::DatabaseDown => Some(AlertKind::DatabaseRecovered),
            _ => None,
        };
        if let Some(opposite) = opposite {
            let prefix = format!("{}:", opposite);
            recent.retain(|key, _| !key.starts_with(&prefix));
        }

        false
    }

    /// Deliver an alert to its resolved channel set.
    ///
    /// Only a malformed event is an error; per-channel failures are logged
    /// and recorded in the report.
    pub async fn send_critical_alert(&self, event: AlertEvent) -> Result<DeliveryReport> {
        if let Err(e) = event.validate() {
            error!("Critical alert failed: {}", e);
            return Err(e);
        }

        match event.level() {
            AlertLevel::Info => info!("[{}] {}", event.kind, event.message),
            AlertLevel::Warning => warn!("[{}] {}", event.kind, event.message),
            AlertLevel::Error | AlertLevel::Critical => {
                error!("[{}] {}", event.kind, event.message)
            }
        }

        let _ = self.event_tx.send(event.clone());
        let mut report = DeliveryReport::empty(event.id);

        if self.should_suppress(&event).await {
            if let Some(ref m) = self.metrics {
                m.inc_alerts_suppressed();
            }
            report.suppressed = true;
            return Ok(report);
        }

        let resolution = self.registry.resolve(event.channels.as_deref());
        report.skipped = resolution.skipped;
        if resolution.selected.is_empty() {
            warn!("No configured channel for {} alert", event.kind);
        }

        let timeout = self.config.delivery_timeout;
        let event = &event;
        let deliveries = resolution.selected.iter().map(|channel| async move {
            let kind = channel.kind();
            let outcome = match tokio::time::timeout(timeout, channel.send(event)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {:?}", timeout)),
            };
            (kind, outcome)
        });

        for (kind, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => {
                    debug!("Alert {} delivered via {}", event.id, kind);
                    report.delivered.push(kind);
                }
                Err(reason) => {
                    error!("Failed to send alert via {}: {}", kind, reason);
                    report.failed.push((kind, reason));
                }
            }
        }

        if let Some(ref m) = self.metrics {
            m.record_dispatch(report.delivered.len() as u64, report.failed.len() as u64);
        }

        Ok(report)
    }

    /// Announce that the database is reachable again.
    ///
    /// Goes only to the recovery subset (slack by default) to keep the
    /// all-clear out of paging channels.
    pub async fn send_recovery_alert(&self) -> Result<DeliveryReport> {
        let event = AlertEvent::database_recovered()
            .with_channels(self.config.recovery_channels.iter().copied());
        self.send_critical_alert(event).await
    }

    /// Counts of suppressed duplicates per alert key
    pub async fn get_suppressed_counts(&self) -> HashMap<String, u32> {
        let recent = self.recent.read().await;
        recent
            .iter()
            .filter(|(_, state)| state.suppressed_count > 0)
            .map(|(key, state)| (key.clone(), state.suppressed_count))
            .collect()
    }

    pub async fn reset_suppression(&self) {
        self.recent.write().await.clear();
        debug!("Alert suppression state reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertChannel, MockAlertChannel};
    use crate::error::GuardError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn channel(
        kind: ChannelKind,
        configured: bool,
        fail: bool,
        calls: Arc<AtomicU32>,
    ) -> Arc<dyn AlertChannel> {
        let mut mock = MockAlertChannel::new();
        mock.expect_kind().return_const(kind);
        mock.expect_is_configured().return_const(configured);
        mock.expect_send().returning(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            if fail {
                Err(GuardError::ChannelDelivery {
                    channel: kind,
                    reason: "smtp relay refused".to_string(),
                })
            } else {
                Ok(())
            }
        });
        Arc::new(mock)
    }

    fn dispatcher(channels: Vec<Arc<dyn AlertChannel>>, config: DispatcherConfig) -> AlertDispatcher {
        let registry = channels
            .into_iter()
            .fold(ChannelRegistry::new(), |r, c| r.with_channel(c));
        AlertDispatcher::new(Arc::new(registry), config)
    }

    #[tokio::test]
    async fn test_delivers_to_configured_only_and_swallows_failure() {
        let email_calls = Arc::new(AtomicU32::new(0));
        let slack_calls = Arc::new(AtomicU32::new(0));
        let dispatcher = dispatcher(
            vec![
                channel(ChannelKind::Email, true, true, email_calls.clone()),
                channel(ChannelKind::Slack, false, false, slack_calls.clone()),
            ],
            DispatcherConfig::default(),
        );

        let report = dispatcher
            .send_critical_alert(AlertEvent::database_down("Database connection lost: x"))
            .await
            .unwrap();

        assert_eq!(email_calls.load(Ordering::SeqCst), 1);
        assert_eq!(slack_calls.load(Ordering::SeqCst), 0);
        assert!(report.delivered.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, ChannelKind::Email);
        assert_eq!(report.skipped, vec![ChannelKind::Slack]);
    }

    #[tokio::test]
    async fn test_one_failing_channel_does_not_block_another() {
        let email_calls = Arc::new(AtomicU32::new(0));
        let slack_calls = Arc::new(AtomicU32::new(0));
        let dispatcher = dispatcher(
            vec![
                channel(ChannelKind::Email, true, true, email_calls.clone()),
                channel(ChannelKind::Slack, true, false, slack_calls.clone()),
            ],
            DispatcherConfig::default(),
        );

        let report = dispatcher
            .send_critical_alert(AlertEvent::startup_failure("boom"))
            .await
            .unwrap();

        assert_eq!(report.delivered, vec![ChannelKind::Slack]);
        assert_eq!(report.attempted(), 2);
        assert_eq!(slack_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_unconfigured_target_resolves_to_nothing() {
        let slack_calls = Arc::new(AtomicU32::new(0));
        let dispatcher = dispatcher(
            vec![
                channel(ChannelKind::Email, true, false, Arc::new(AtomicU32::new(0))),
                channel(ChannelKind::Slack, false, false, slack_calls.clone()),
            ],
            DispatcherConfig::default(),
        );

        let report = dispatcher
            .send_critical_alert(
                AlertEvent::database_down("x").with_channels([ChannelKind::Slack]),
            )
            .await
            .unwrap();

        assert_eq!(report.attempted(), 0);
        assert_eq!(slack_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_event_surfaces_error() {
        let dispatcher = dispatcher(Vec::new(), DispatcherConfig::default());
        let result = dispatcher
            .send_critical_alert(AlertEvent::database_down("x").with_channels(Vec::new()))
            .await;
        assert!(matches!(result, Err(GuardError::InvalidAlert(_))));
    }

    #[tokio::test]
    async fn test_recovery_alert_targets_recovery_subset() {
        let email_calls = Arc::new(AtomicU32::new(0));
        let slack_calls = Arc::new(AtomicU32::new(0));
        let dispatcher = dispatcher(
            vec![
                channel(ChannelKind::Email, true, false, email_calls.clone()),
                channel(ChannelKind::Slack, true, false, slack_calls.clone()),
            ],
            DispatcherConfig::default(),
        );
        let mut events = dispatcher.subscribe();

        let report = dispatcher.send_recovery_alert().await.unwrap();

        assert_eq!(report.delivered, vec![ChannelKind::Slack]);
        assert_eq!(email_calls.load(Ordering::SeqCst), 0);
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, AlertKind::DatabaseRecovered);
        assert_eq!(event.channels, Some(vec![ChannelKind::Slack]));
    }

    #[tokio::test]
    async fn test_duplicate_suppression_window() {
        let calls = Arc::new(AtomicU32::new(0));
        let dispatcher = dispatcher(
            vec![channel(ChannelKind::Slack, true, false, calls.clone())],
            DispatcherConfig {
                suppress_duplicates_secs: 300,
                ..Default::default()
            },
        );

        let first = dispatcher
            .send_critical_alert(AlertEvent::database_down("same"))
            .await
            .unwrap();
        let second = dispatcher
            .send_critical_alert(AlertEvent::database_down("same"))
            .await
            .unwrap();
        let different = dispatcher
            .send_critical_alert(AlertEvent::database_down("other"))
            .await
            .unwrap();

        assert!(!first.suppressed);
        assert!(second.suppressed);
        assert!(!different.suppressed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let counts = dispatcher.get_suppressed_counts().await;
        assert_eq!(counts.get("DATABASE_DOWN:same"), Some(&1));

        dispatcher.reset_suppression().await;
        assert!(dispatcher.get_suppressed_counts().await.is_empty());
    }

    #[tokio::test]
    async fn test_recovery_reopens_window_for_next_outage() {
        let calls = Arc::new(AtomicU32::new(0));
        let dispatcher = dispatcher(
            vec![channel(ChannelKind::Slack, true, false, calls.clone())],
            DispatcherConfig {
                suppress_duplicates_secs: 300,
                ..Default::default()
            },
        );
        let lost = "Database connection lost: connection refused";

        let first_down = dispatcher
            .send_critical_alert(AlertEvent::database_down(lost))
            .await
            .unwrap();
        let recovered = dispatcher.send_recovery_alert().await.unwrap();
        let second_down = dispatcher
            .send_critical_alert(AlertEvent::database_down(lost))
            .await
            .unwrap();
        let second_recovery = dispatcher.send_recovery_alert().await.unwrap();

        assert!(!first_down.suppressed);
        assert!(!recovered.suppressed);
        assert!(!second_down.suppressed);
        assert!(!second_recovery.suppressed);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // Repeats within one outage are still collapsed
        let repeat = dispatcher
            .send_critical_alert(AlertEvent::database_down(lost))
            .await
            .unwrap();
        let repeat_again = dispatcher
            .send_critical_alert(AlertEvent::database_down(lost))
            .await
            .unwrap();
        assert!(!repeat.suppressed);
        assert!(repeat_again.suppressed);
    }

    #[tokio::test]
    async fn test_suppression_disabled_by_default() {
        let calls = Arc::new(AtomicU32::new(0));
        let dispatcher = dispatcher(
            vec![channel(ChannelKind::Slack, true, false, calls.clone())],
            DispatcherConfig::default(),
        );

        for _ in 0..3 {
            dispatcher
                .send_critical_alert(AlertEvent::database_down("same"))
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
