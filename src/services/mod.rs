pub mod health;
pub mod metrics;

pub use health::{
    router, DatabaseHealth, HealthDetails, HealthResponse, HealthServer, HealthState, HealthStatus,
};
pub use metrics::Metrics;
