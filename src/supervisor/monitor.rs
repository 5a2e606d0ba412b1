//! Health Monitor
//!
//! Periodically checks connection liveness, drives reconnection through the
//! supervisor and raises down/recovered alerts. Ticks run one at a time; a
//! tick that overruns the interval causes the missed ticks to be skipped.
//! Each tick runs in its own task so a panic cannot end the schedule.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{cancelled, ConnectionSupervisor, DataStore};
use crate::alert::{AlertDispatcher, AlertEvent};
use crate::error::GuardError;
use crate::services::Metrics;

const UNKNOWN_ERROR: &str = "Unknown database connection error";

/// Result of one health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Connected and the ping succeeded
    Healthy,
    /// Was down, reconnected this tick
    Recovered,
    /// Down; carries the alerted message
    Down(String),
    /// Shutdown interrupted the check
    Cancelled,
}

pub struct HealthMonitor<S: DataStore> {
    supervisor: Arc<ConnectionSupervisor<S>>,
    dispatcher: Arc<AlertDispatcher>,
    interval: Duration,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    ticks: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl<S: DataStore> HealthMonitor<S> {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor<S>>,
        dispatcher: Arc<AlertDispatcher>,
        interval: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            supervisor,
            dispatcher,
            interval,
            running: AtomicBool::new(false),
            stop_tx,
            ticks: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ticks completed so far, panicked ones included
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    async fn alert_down(&self, message: String) {
        if let Err(e) = self
            .dispatcher
            .send_critical_alert(AlertEvent::database_down(message))
            .await
        {
            error!("Failed to dispatch database down alert: {}", e);
        }
    }

    /// Run a single health check.
    ///
    /// A live connection is pinged; a dead one, or one whose ping fails, is
    /// reconnected. Reconnection success raises `DATABASE_RECOVERED`, any
    /// failure raises `DATABASE_DOWN`.
    pub async fn tick(&self) -> TickOutcome {
        if let Some(ref m) = self.metrics {
            m.inc_monitor_ticks();
        }

        if self.supervisor.is_connected() {
            match self.supervisor.probe().await {
                Ok(latency) => {
                    debug!("Database healthy (ping {:?})", latency);
                    return TickOutcome::Healthy;
                }
                Err(e) => warn!("Database liveness check failed: {}", e),
            }
        }

        match self.supervisor.connect().await {
            Ok(_) => {
                info!("Database connection recovered");
                if let Err(e) = self.dispatcher.send_recovery_alert().await {
                    error!("Failed to dispatch recovery alert: {}", e);
                }
                TickOutcome::Recovered
            }
            Err(GuardError::Cancelled) => TickOutcome::Cancelled,
            Err(e) => {
                let message = format!("Database connection lost: {}", e);
                error!("{}", message);
                self.alert_down(message.clone()).await;
                TickOutcome::Down(message)
            }
        }
    }

    /// Start the recurring schedule. The first check runs one interval
    /// after start.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        self.stop_tx.send_replace(false);

        let monitor = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let period = monitor.interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Health monitor started (interval {:?})", period);

            loop {
                tokio::select! {
                    _ = cancelled(&mut stop_rx) => break,
                    _ = ticker.tick() => {}
                }

                let mut check = tokio::spawn({
                    let monitor = Arc::clone(&monitor);
                    async move { monitor.tick().await }
                });

                let joined = tokio::select! {
                    _ = cancelled(&mut stop_rx) => {
                        check.abort();
                        break;
                    }
                    joined = &mut check => joined,
                };
                monitor.ticks.fetch_add(1, Ordering::SeqCst);

                match joined {
                    Ok(outcome) => debug!("Health check finished: {:?}", outcome),
                    Err(e) if e.is_panic() => {
                        error!("Health check panicked: {}", e);
                        if let Some(ref m) = monitor.metrics {
                            m.inc_monitor_tick_panics();
                        }
                        monitor.alert_down(UNKNOWN_ERROR.to_string()).await;
                    }
                    Err(e) => warn!("Health check aborted: {}", e),
                }
            }

            monitor.running.store(false, Ordering::SeqCst);
            info!("Health monitor stopped");
        })
    }

    /// Stop the schedule, aborting a check in progress
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
    }
}
