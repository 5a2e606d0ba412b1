pub mod adapters;
pub mod alert;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod error;
pub mod services;
pub mod supervisor;

pub use alert::{
    AlertChannel, AlertDispatcher, AlertEvent, AlertKind, AlertLevel, ChannelKind,
    ChannelRegistry, DeliveryReport,
};
pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal};
pub use error::{GuardError, Result};
pub use supervisor::{ConnectionState, ConnectionSupervisor, DataStore, HealthMonitor};
