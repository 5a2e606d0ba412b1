//! Supervision of the database connection
//!
//! - Connection supervisor for bounded connect-with-retry and shutdown
//! - Health monitor for periodic liveness checks and down/recovered alerts

pub mod connection;
pub mod monitor;
pub mod store;

pub use connection::{ConnectionProbe, ConnectionState, ConnectionSupervisor, RetryPolicy};
pub use monitor::{HealthMonitor, TickOutcome};
pub use store::DataStore;

use tokio::sync::watch;

/// Resolves once the flag turns true. Never resolves if the sender is gone.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
