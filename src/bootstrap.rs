//! Service startup and teardown
//!
//! Startup connects once before anything else runs. Exhausting the retry
//! budget here is fatal: a `STARTUP_FAILURE` alert goes out and the error is
//! returned so the process can exit.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::alert::{AlertDispatcher, AlertEvent, ChannelRegistry, DispatcherConfig};
use crate::config::AppConfig;
use crate::coordination::GracefulShutdown;
use crate::error::{GuardError, Result};
use crate::services::{HealthState, Metrics};
use crate::supervisor::{ConnectionProbe, ConnectionSupervisor, DataStore, HealthMonitor, RetryPolicy};

/// A running connection guard
pub struct Service<S: DataStore> {
    pub supervisor: Arc<ConnectionSupervisor<S>>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub monitor: Arc<HealthMonitor<S>>,
    pub metrics: Arc<Metrics>,
    task: JoinHandle<()>,
}

/// Connect, then start the health monitor
pub async fn start<S: DataStore>(
    config: &AppConfig,
    store: S,
    registry: ChannelRegistry,
) -> Result<Service<S>> {
    let metrics = Arc::new(Metrics::new());
    let dispatcher = Arc::new(
        AlertDispatcher::new(Arc::new(registry), DispatcherConfig::from(&config.alerts))
            .with_metrics(metrics.clone()),
    );
    let supervisor = Arc::new(
        ConnectionSupervisor::new(store, RetryPolicy::from(&config.database))
            .with_metrics(metrics.clone()),
    );

    info!(
        "Connecting to database (max retries {}, retry delay {}ms)",
        config.database.max_retries, config.database.retry_delay_ms
    );

    if let Err(e) = supervisor.connect().await {
        error!("Failed to start application: {}", e);
        let alert = AlertEvent::startup_failure(&e).with_metadata(serde_json::json!({
            "environment": config.environment.as_str(),
        }));
        if let Err(alert_err) = dispatcher.send_critical_alert(alert).await {
            error!("Failed to dispatch startup failure alert: {}", alert_err);
        }
        supervisor.shutdown().await;
        return Err(e);
    }

    let monitor = Arc::new(
        HealthMonitor::new(
            supervisor.clone(),
            dispatcher.clone(),
            config.monitor.interval(),
        )
        .with_metrics(metrics.clone()),
    );
    let task = monitor.start();

    info!("Application started in {} mode", config.environment);

    Ok(Service {
        supervisor,
        dispatcher,
        monitor,
        metrics,
        task,
    })
}

impl<S: DataStore> Service<S> {
    /// State for the health server, backed by this service's supervisor
    pub fn health_state(&self) -> HealthState {
        let connection: Arc<dyn ConnectionProbe> = self.supervisor.clone();
        HealthState::new(connection).with_metrics(self.metrics.clone())
    }

    /// Stop the monitor, then release the connection
    pub async fn shutdown(self, coordinator: &GracefulShutdown) -> Result<()> {
        let monitor = self.monitor;
        let task = self.task;
        let supervisor = self.supervisor;

        let result = coordinator
            .execute(
                move || {
                    Box::pin(async move {
                        monitor.stop();
                        let _ = task.await;
                    })
                },
                move || Box::pin(async move { supervisor.shutdown().await }),
            )
            .await;

        self.metrics.log_status();
        result.map_err(|e| GuardError::Internal(e.to_string()))
    }
}
