use chrono::Utc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::info;

/// Metrics collector for observability
pub struct Metrics {
    /// Health monitor ticks run
    pub monitor_ticks: AtomicU64,
    /// Ticks that ended in a panic
    pub monitor_tick_panics: AtomicU64,
    /// Individual connection attempts
    pub connect_attempts: AtomicU64,
    /// Reconnections after a lost connection
    pub reconnections: AtomicU64,
    /// Times the retry budget ran out
    pub connect_exhaustions: AtomicU64,
    /// Alerts handed to the dispatcher and not suppressed
    pub alerts_dispatched: AtomicU64,
    /// Successful per-channel deliveries
    pub alert_deliveries: AtomicU64,
    /// Failed per-channel deliveries
    pub alert_delivery_failures: AtomicU64,
    /// Alerts dropped as duplicates
    pub alerts_suppressed: AtomicU64,
    /// 1 while the supervisor reports connected
    connected: AtomicU64,
    /// Last successful ping latency in microseconds
    last_ping_micros: AtomicU64,
    /// Last update timestamp
    last_update: AtomicI64,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            monitor_ticks: AtomicU64::new(0),
            monitor_tick_panics: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
            connect_exhaustions: AtomicU64::new(0),
            alerts_dispatched: AtomicU64::new(0),
            alert_deliveries: AtomicU64::new(0),
            alert_delivery_failures: AtomicU64::new(0),
            alerts_suppressed: AtomicU64::new(0),
            connected: AtomicU64::new(0),
            last_ping_micros: AtomicU64::new(0),
            last_update: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    fn touch(&self) {
        self.last_update.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn inc_monitor_ticks(&self) {
        self.monitor_ticks.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn inc_monitor_tick_panics(&self) {
        self.monitor_tick_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connect_attempts(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment reconnections
    pub fn inc_reconnections(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connect_exhaustions(&self) {
        self.connect_exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alerts_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one dispatched alert
    pub fn record_dispatch(&self, delivered: u64, failed: u64) {
        self.alerts_dispatched.fetch_add(1, Ordering::Relaxed);
        self.alert_deliveries.fetch_add(delivered, Ordering::Relaxed);
        self.alert_delivery_failures.fetch_add(failed, Ordering::Relaxed);
        self.touch();
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected as u64, Ordering::Relaxed);
        self.touch();
    }

    pub fn set_last_ping(&self, latency: std::time::Duration) {
        self.last_ping_micros
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) == 1
    }

    /// Get current metrics as a formatted string
    pub fn summary(&self) -> String {
        format!(
            r#"
=== DBGUARD STATUS ===
Connected: {} | Last ping: {:.1}ms
Ticks: {} (panics: {}) | Connect attempts: {} | Reconnections: {}
Alerts: {} dispatched, {} delivered, {} failed, {} suppressed
======================
"#,
            self.is_connected(),
            self.last_ping_micros.load(Ordering::Relaxed) as f64 / 1000.0,
            self.monitor_ticks.load(Ordering::Relaxed),
            self.monitor_tick_panics.load(Ordering::Relaxed),
            self.connect_attempts.load(Ordering::Relaxed),
            self.reconnections.load(Ordering::Relaxed),
            self.alerts_dispatched.load(Ordering::Relaxed),
            self.alert_deliveries.load(Ordering::Relaxed),
            self.alert_delivery_failures.load(Ordering::Relaxed),
            self.alerts_suppressed.load(Ordering::Relaxed),
        )
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(&self) -> String {
        format!(
            r#"# HELP dbguard_monitor_ticks_total Health monitor ticks run
# TYPE dbguard_monitor_ticks_total counter
dbguard_monitor_ticks_total {}

# HELP dbguard_monitor_tick_panics_total Health monitor ticks that panicked
# TYPE dbguard_monitor_tick_panics_total counter
dbguard_monitor_tick_panics_total {}

# HELP dbguard_connect_attempts_total Database connection attempts
# TYPE dbguard_connect_attempts_total counter
dbguard_connect_attempts_total {}

# HELP dbguard_reconnections_total Reconnections after a lost connection
# TYPE dbguard_reconnections_total counter
dbguard_reconnections_total {}

# HELP dbguard_connect_exhaustions_total Connection retry budgets exhausted
# TYPE dbguard_connect_exhaustions_total counter
dbguard_connect_exhaustions_total {}

# HELP dbguard_alerts_dispatched_total Alerts dispatched to channels
# TYPE dbguard_alerts_dispatched_total counter
dbguard_alerts_dispatched_total {}

# HELP dbguard_alert_deliveries_total Successful channel deliveries
# TYPE dbguard_alert_deliveries_total counter
dbguard_alert_deliveries_total {}

# HELP dbguard_alert_delivery_failures_total Failed channel deliveries
# TYPE dbguard_alert_delivery_failures_total counter
dbguard_alert_delivery_failures_total {}

# HELP dbguard_alerts_suppressed_total Duplicate alerts suppressed
# TYPE dbguard_alerts_suppressed_total counter
dbguard_alerts_suppressed_total {}

# HELP dbguard_database_connected Whether the database connection is up
# TYPE dbguard_database_connected gauge
dbguard_database_connected {}

# HELP dbguard_last_ping_seconds Latency of the last successful ping
# TYPE dbguard_last_ping_seconds gauge
dbguard_last_ping_seconds {}

# HELP dbguard_last_update_timestamp_seconds Last metrics update
# TYPE dbguard_last_update_timestamp_seconds gauge
dbguard_last_update_timestamp_seconds {}
"#,
            self.monitor_ticks.load(Ordering::Relaxed),
            self.monitor_tick_panics.load(Ordering::Relaxed),
            self.connect_attempts.load(Ordering::Relaxed),
            self.reconnections.load(Ordering::Relaxed),
            self.connect_exhaustions.load(Ordering::Relaxed),
            self.alerts_dispatched.load(Ordering::Relaxed),
            self.alert_deliveries.load(Ordering::Relaxed),
            self.alert_delivery_failures.load(Ordering::Relaxed),
            self.alerts_suppressed.load(Ordering::Relaxed),
            self.connected.load(Ordering::Relaxed),
            self.last_ping_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            self.last_update.load(Ordering::Relaxed),
        )
    }

    /// Log periodic status
    pub fn log_status(&self) {
        info!("{}", self.summary());
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
