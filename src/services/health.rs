//! Health check HTTP server
//!
//! Liveness and readiness probes for process supervision plus a Prometheus
//! metrics endpoint. Database status comes from a live ping through the
//! connection supervisor, never from the data store directly.

use crate::services::Metrics;
use crate::supervisor::{ConnectionProbe, ConnectionState};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Down,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Ok)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub status: HealthStatus,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub database: DatabaseHealth,
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub details: HealthDetails,
}

/// Shared state for health server
pub struct HealthState {
    /// When the server started
    pub started_at: DateTime<Utc>,
    connection: Arc<dyn ConnectionProbe>,
    /// Metrics reference
    pub metrics: Option<Arc<Metrics>>,
}

impl HealthState {
    pub fn new(connection: Arc<dyn ConnectionProbe>) -> Self {
        Self {
            started_at: Utc::now(),
            connection,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, m: Arc<Metrics>) -> Self {
        self.metrics = Some(m);
        self
    }

    /// Ping the database and build the health report
    pub async fn get_health(&self) -> HealthResponse {
        let state = self.connection.state();
        let database = match self.connection.probe().await {
            Ok(latency) => DatabaseHealth {
                status: HealthStatus::Ok,
                state: ConnectionState::Connected.to_string(),
                ping_ms: Some(latency.as_micros() as f64 / 1000.0),
                error: None,
            },
            Err(e) => DatabaseHealth {
                status: HealthStatus::Down,
                state: state.to_string(),
                ping_ms: None,
                error: Some(e.to_string()),
            },
        };

        HealthResponse {
            status: database.status,
            timestamp: Utc::now(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            details: HealthDetails { database },
        }
    }
}

/// Build the health router
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> crate::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting health server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::GuardError::Internal(format!("Health server error: {}", e)))?;

        info!("Health server stopped");
        Ok(())
    }
}

/// Full health check endpoint
async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Liveness probe - is the process alive?
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe - answers from cached state without touching the database
async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.connection.state() {
        ConnectionState::Connected => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus metrics endpoint
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    let up = matches!(state.connection.state(), ConnectionState::Connected) as u8;

    let mut body = format!(
        r#"# HELP dbguard_up Database reachable (1) or not (0)
# TYPE dbguard_up gauge
dbguard_up {}

# HELP dbguard_uptime_seconds Uptime in seconds
# TYPE dbguard_uptime_seconds counter
dbguard_uptime_seconds {}

"#,
        up, uptime,
    );
    if let Some(ref m) = state.metrics {
        body.push_str(&m.prometheus());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}
