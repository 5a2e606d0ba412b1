//! Connection Supervisor
//!
//! Owns the single logical connection to the data store: bounded
//! connect-with-retry, liveness state, and release on shutdown.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use super::{cancelled, DataStore};
use crate::config::DatabaseConfig;
use crate::error::{GuardError, Result};
use crate::services::Metrics;

/// Last known state of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting to retry; carries the retries used so far
    Failed(u32),
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed(retries) => write!(f, "failed ({} retries)", retries),
        }
    }
}

/// Retry policy: `max_retries` retries after the first attempt, a fixed
/// pause between them, and a deadline on each attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&DatabaseConfig> for RetryPolicy {
    fn from(db: &DatabaseConfig) -> Self {
        Self {
            max_retries: db.max_retries,
            retry_delay: db.retry_delay(),
            connect_timeout: db.connect_timeout(),
        }
    }
}

pub struct ConnectionSupervisor<S: DataStore> {
    store: S,
    policy: RetryPolicy,
    retry_count: AtomicU32,
    state_tx: watch::Sender<ConnectionState>,
    handle: RwLock<Option<S::Handle>>,
    /// Bumped each time a new handle is installed
    generation: AtomicU64,
    /// Serializes connect attempts and shutdown
    connect_lock: Mutex<()>,
    cancel_tx: watch::Sender<bool>,
    ever_connected: AtomicBool,
    metrics: Option<Arc<Metrics>>,
}

impl<S: DataStore> ConnectionSupervisor<S> {
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            store,
            policy,
            retry_count: AtomicU32::new(0),
            state_tx,
            handle: RwLock::new(None),
            generation: AtomicU64::new(0),
            connect_lock: Mutex::new(()),
            cancel_tx,
            ever_connected: AtomicBool::new(false),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Last known liveness. Never performs I/O.
    pub fn is_connected(&self) -> bool {
        matches!(*self.state_tx.borrow(), ConnectionState::Connected)
    }

    /// Retries consumed by the connect cycle in progress
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Connection state: {} -> {}", previous, state);
        }
        if let Some(ref m) = self.metrics {
            m.set_connected(state == ConnectionState::Connected);
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Establish the connection, retrying with a fixed delay.
    ///
    /// Makes at most `max_retries + 1` attempts. Success resets the retry
    /// counter; so does exhaustion, so the next cycle starts from zero.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<S::Handle> {
        let _guard = self.connect_lock.lock().await;
        if self.is_shut_down() {
            return Err(GuardError::Cancelled);
        }

        if let Some(stale) = self.handle.write().await.take() {
            debug!("Releasing stale connection before reconnecting");
            self.store.close(stale).await;
        }

        let mut cancel_rx = self.cancel_tx.subscribe();

        loop {
            self.set_state(ConnectionState::Connecting);
            if let Some(ref m) = self.metrics {
                m.inc_connect_attempts();
            }

            let attempt = tokio::select! {
                _ = cancelled(&mut cancel_rx) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(GuardError::Cancelled);
                }
                result = tokio::time::timeout(self.policy.connect_timeout, self.store.connect()) => result,
            };

            let last_error = match attempt {
                Ok(Ok(handle)) => {
                    self.retry_count.store(0, Ordering::SeqCst);
                    {
                        let mut slot = self.handle.write().await;
                        *slot = Some(handle.clone());
                        self.generation.fetch_add(1, Ordering::SeqCst);
                    }
                    self.set_state(ConnectionState::Connected);
                    if self.ever_connected.swap(true, Ordering::SeqCst) {
                        if let Some(ref m) = self.metrics {
                            m.inc_reconnections();
                        }
                    }
                    info!("Successfully connected to database");
                    return Ok(handle);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "connection attempt timed out after {:?}",
                    self.policy.connect_timeout
                ),
            };

            let retries = self.retry_count.load(Ordering::SeqCst);
            if retries >= self.policy.max_retries {
                self.retry_count.store(0, Ordering::SeqCst);
                self.set_state(ConnectionState::Failed(retries));
                if let Some(ref m) = self.metrics {
                    m.inc_connect_exhaustions();
                }
                error!(
                    "Database connection failed after {} attempts: {}",
                    retries + 1,
                    last_error
                );
                return Err(GuardError::ConnectionExhausted {
                    attempts: retries + 1,
                    last_error,
                });
            }

            let retries = retries + 1;
            self.retry_count.store(retries, Ordering::SeqCst);
            self.set_state(ConnectionState::Failed(retries));
            warn!(
                "Database connection attempt {} failed: {}. Retrying in {:?} ({}/{})",
                retries,
                last_error,
                self.policy.retry_delay,
                retries,
                self.policy.max_retries
            );

            tokio::select! {
                _ = cancelled(&mut cancel_rx) => {
                    self.retry_count.store(0, Ordering::SeqCst);
                    self.set_state(ConnectionState::Disconnected);
                    return Err(GuardError::Cancelled);
                }
                _ = tokio::time::sleep(self.policy.retry_delay) => {}
            }
        }
    }

    /// Ping the live connection. A failed ping marks the connection down,
    /// unless a reconnect replaced the pinged handle in the meantime.
    pub async fn probe(&self) -> Result<Duration> {
        if !self.is_connected() {
            return Err(GuardError::NotConnected);
        }
        let (generation, handle) = {
            let slot = self.handle.read().await;
            let handle = slot.clone().ok_or(GuardError::NotConnected)?;
            (self.generation.load(Ordering::SeqCst), handle)
        };

        let reason = match tokio::time::timeout(
            self.policy.connect_timeout,
            self.store.ping(&handle),
        )
        .await
        {
            Ok(Ok(latency)) => {
                if let Some(ref m) = self.metrics {
                    m.set_last_ping(latency);
                }
                return Ok(latency);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("ping timed out after {:?}", self.policy.connect_timeout),
        };

        let downgraded = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connected
                && self.generation.load(Ordering::SeqCst) == generation
            {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if downgraded {
            if let Some(ref m) = self.metrics {
                m.set_connected(false);
            }
            warn!("Database ping failed: {}", reason);
        } else {
            debug!("Ignoring ping failure on a replaced connection: {}", reason);
        }
        Err(GuardError::TransientConnection(reason))
    }

    /// Cancel any pending attempt or retry delay and release the connection.
    ///
    /// Safe to call repeatedly and before any connect; later `connect`
    /// calls fail with `Cancelled`.
    pub async fn shutdown(&self) {
        self.cancel_tx.send_replace(true);
        let _guard = self.connect_lock.lock().await;

        if let Some(handle) = self.handle.write().await.take() {
            self.store.close(handle).await;
            info!("Database connection closed");
        }
        self.retry_count.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Object-safe view of a supervisor for health reporting
#[async_trait]
pub trait ConnectionProbe: Send + Sync {
    fn state(&self) -> ConnectionState;

    async fn probe(&self) -> Result<Duration>;
}

#[async_trait]
impl<S: DataStore> ConnectionProbe for ConnectionSupervisor<S> {
    fn state(&self) -> ConnectionState {
        ConnectionSupervisor::state(self)
    }

    async fn probe(&self) -> Result<Duration> {
        ConnectionSupervisor::probe(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    /// Fails the first `failures` connects, then succeeds
    #[derive(Default)]
    struct FlakyStore {
        failures: AtomicUsize,
        attempts: std::sync::Mutex<Vec<Instant>>,
        closed: AtomicUsize,
        ping_fails: AtomicBool,
    }

    impl FlakyStore {
        fn failing(n: usize) -> Self {
            Self {
                failures: AtomicUsize::new(n),
                ..Default::default()
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DataStore for FlakyStore {
        type Handle = u32;

        async fn connect(&self) -> Result<u32> {
            self.attempts.lock().unwrap().push(Instant::now());
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(GuardError::TransientConnection(
                    "connection refused".to_string(),
                ));
            }
            Ok(7)
        }

        async fn ping(&self, _handle: &u32) -> Result<Duration> {
            if self.ping_fails.load(Ordering::SeqCst) {
                Err(GuardError::TransientConnection("broken pipe".to_string()))
            } else {
                Ok(Duration::from_millis(2))
            }
        }

        async fn close(&self, _handle: u32) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_n_plus_one_attempts() {
        let supervisor = ConnectionSupervisor::new(FlakyStore::failing(usize::MAX), policy(3));

        let err = supervisor.connect().await.unwrap_err();
        match err {
            GuardError::ConnectionExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(supervisor.store.attempts(), 4);
        assert_eq!(supervisor.retry_count(), 0);
        assert!(!supervisor.is_connected());

        let times = supervisor.store.attempts.lock().unwrap().clone();
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_makes_single_attempt() {
        let supervisor = ConnectionSupervisor::new(FlakyStore::failing(usize::MAX), policy(0));
        assert!(supervisor.connect().await.is_err());
        assert_eq!(supervisor.store.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_retry_counter() {
        let supervisor = ConnectionSupervisor::new(FlakyStore::failing(2), policy(3));

        assert_eq!(supervisor.connect().await.unwrap(), 7);
        assert_eq!(supervisor.store.attempts(), 3);
        assert_eq!(supervisor.retry_count(), 0);
        assert!(supervisor.is_connected());

        // A second outage gets the full budget again
        supervisor.store.failures.store(3, Ordering::SeqCst);
        supervisor.store.ping_fails.store(true, Ordering::SeqCst);
        assert!(supervisor.probe().await.is_err());
        assert!(!supervisor.is_connected());

        supervisor.store.ping_fails.store(false, Ordering::SeqCst);
        assert!(supervisor.connect().await.is_ok());
        assert_eq!(supervisor.store.attempts(), 7);
        // The stale handle was released before reconnecting
        assert_eq!(supervisor.store.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_retry_delay() {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            FlakyStore::failing(usize::MAX),
            RetryPolicy {
                max_retries: 5,
                retry_delay: Duration::from_secs(3600),
                connect_timeout: Duration::from_secs(5),
            },
        ));

        let pending = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.connect().await }
        });

        let mut state = supervisor.subscribe();
        state
            .wait_for(|s| matches!(s, ConnectionState::Failed(_)))
            .await
            .unwrap();
        supervisor.shutdown().await;

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(GuardError::Cancelled)));
        assert_eq!(supervisor.store.attempts(), 1);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert!(matches!(
            supervisor.connect().await,
            Err(GuardError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_releases_handle() {
        let supervisor = ConnectionSupervisor::new(FlakyStore::default(), policy(0));
        supervisor.shutdown().await;
        assert_eq!(supervisor.store.closed.load(Ordering::SeqCst), 0);

        let supervisor = ConnectionSupervisor::new(FlakyStore::default(), policy(0));
        supervisor.connect().await.unwrap();
        supervisor.shutdown().await;
        supervisor.shutdown().await;
        assert_eq!(supervisor.store.closed.load(Ordering::SeqCst), 1);
        assert!(!supervisor.is_connected());
    }

    #[tokio::test]
    async fn test_probe_requires_connection() {
        let supervisor = ConnectionSupervisor::new(FlakyStore::default(), policy(0));
        assert!(matches!(
            supervisor.probe().await,
            Err(GuardError::NotConnected)
        ));

        supervisor.connect().await.unwrap();
        assert_eq!(supervisor.probe().await.unwrap(), Duration::from_millis(2));
    }

    /// Hands out handles 1, 2, ...; handle 1 answers pings slowly and then fails
    #[derive(Default)]
    struct ReplacedHandleStore {
        next: AtomicU32,
    }

    #[async_trait]
    impl DataStore for ReplacedHandleStore {
        type Handle = u32;

        async fn connect(&self) -> Result<u32> {
            Ok(self.next.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn ping(&self, handle: &u32) -> Result<Duration> {
            if *handle == 1 {
                tokio::time::sleep(Duration::from_secs(10)).await;
                return Err(GuardError::TransientConnection("connection reset".to_string()));
            }
            Ok(Duration::from_millis(1))
        }

        async fn close(&self, _handle: u32) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ping_failure_on_replaced_handle_keeps_new_connection() {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            ReplacedHandleStore::default(),
            RetryPolicy {
                max_retries: 0,
                retry_delay: Duration::from_secs(1),
                connect_timeout: Duration::from_secs(30),
            },
        ));
        assert_eq!(supervisor.connect().await.unwrap(), 1);

        let slow_ping = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.probe().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(supervisor.connect().await.unwrap(), 2);
        assert!(supervisor.is_connected());

        assert!(slow_ping.await.unwrap().is_err());
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(supervisor.probe().await.unwrap(), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions_are_observable() {
        let supervisor = ConnectionSupervisor::new(FlakyStore::failing(1), policy(1));
        let rx = supervisor.subscribe();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

        supervisor.connect().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
        assert_eq!(ConnectionState::Failed(2).to_string(), "failed (2 retries)");
    }
}
