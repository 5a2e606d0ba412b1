//! Graceful Shutdown Handler
//!
//! Stops the health monitor first so no new reconnect starts, then releases
//! the database connection, each phase under its own timeout.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

type PhaseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "interrupt"),
            ShutdownSignal::Terminate => write!(f, "terminate"),
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Total timeout for graceful shutdown (default: 30s)
    pub total_timeout_secs: u64,
    /// Time to wait for the monitor loop to stop (default: 10s)
    pub monitor_stop_timeout_secs: u64,
    /// Time to wait for the connection to close (default: 10s)
    pub connection_close_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: 30,
            monitor_stop_timeout_secs: 10,
            connection_close_timeout_secs: 10,
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    StoppingMonitor,
    ClosingConnection,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingMonitor => write!(f, "stopping_monitor"),
            ShutdownPhase::ClosingConnection => write!(f, "closing_connection"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Shutdown errors
#[derive(Debug, Clone, Error)]
pub enum ShutdownError {
    #[error("shutdown timed out")]
    Timeout,
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: AtomicBool,
    requested_tx: watch::Sender<bool>,
    phase: watch::Sender<ShutdownPhase>,
}

impl GracefulShutdown {
    /// Create a new graceful shutdown handler
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        let (requested_tx, _) = watch::channel(false);

        Self {
            config,
            shutdown_requested: AtomicBool::new(false),
            requested_tx,
            phase,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Get current shutdown phase
    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Request shutdown; later requests are ignored
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        self.requested_tx.send_replace(true);
    }

    /// Resolve once shutdown has been requested, including before this call
    pub async fn wait_for_request(&self) {
        let mut rx = self.requested_tx.subscribe();
        let _ = rx.wait_for(|requested| *requested).await;
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Execute the shutdown sequence:
    /// 1. Stop the health monitor
    /// 2. Close the database connection
    ///
    /// The connection is closed even when the total budget is already spent;
    /// the overrun is reported afterwards.
    pub async fn execute<F1, F2>(
        &self,
        stop_monitor: F1,
        close_connection: F2,
    ) -> Result<(), ShutdownError>
    where
        F1: FnOnce() -> PhaseFuture,
        F2: FnOnce() -> PhaseFuture,
    {
        let start = tokio::time::Instant::now();
        let total_timeout = Duration::from_secs(self.config.total_timeout_secs);

        info!(
            "Starting graceful shutdown (timeout: {}s)",
            self.config.total_timeout_secs
        );

        // Phase 1: Stop monitor
        self.set_phase(ShutdownPhase::StoppingMonitor);
        let monitor_timeout = Duration::from_secs(self.config.monitor_stop_timeout_secs);
        match tokio::time::timeout(monitor_timeout, stop_monitor()).await {
            Ok(()) => debug!("Health monitor stopped"),
            Err(_) => warn!(
                "Health monitor stop timeout after {}s, proceeding anyway",
                self.config.monitor_stop_timeout_secs
            ),
        }

        // Phase 2: Close connection
        self.set_phase(ShutdownPhase::ClosingConnection);
        let close_timeout = Duration::from_secs(self.config.connection_close_timeout_secs);
        match tokio::time::timeout(close_timeout, close_connection()).await {
            Ok(()) => debug!("Database connection released"),
            Err(_) => warn!(
                "Connection close timeout after {}s",
                self.config.connection_close_timeout_secs
            ),
        }

        self.set_phase(ShutdownPhase::Complete);
        if start.elapsed() > total_timeout {
            error!("Total shutdown timeout exceeded after {:?}", start.elapsed());
            return Err(ShutdownError::Timeout);
        }
        info!("Graceful shutdown completed in {:?}", start.elapsed());

        Ok(())
    }
}

/// Install OS signal handlers that request shutdown
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                shutdown_sigint.request_shutdown(ShutdownSignal::Interrupt);
            }
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("Received SIGTERM");
                    shutdown.request_shutdown(ShutdownSignal::Terminate);
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        });
    }
}
