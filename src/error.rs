use thiserror::Error;

use crate::alert::ChannelKind;

/// Main error type for the connection guard
#[derive(Error, Debug)]
pub enum GuardError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation failed:\n• {}", .0.join("\n• "))]
    ConfigValidation(Vec<String>),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },

    #[error("Transient connection error: {0}")]
    TransientConnection(String),

    #[error("Not connected")]
    NotConnected,

    // Alerting errors
    #[error("{0} channel is not properly configured")]
    ChannelNotConfigured(ChannelKind),

    #[error("Delivery via {channel} failed: {reason}")]
    ChannelDelivery { channel: ChannelKind, reason: String },

    #[error("Invalid alert: {0}")]
    InvalidAlert(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GuardError {
    /// Fatal errors abort startup; everything else is recoverable at runtime.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GuardError::Config(_)
                | GuardError::ConfigValidation(_)
                | GuardError::ConnectionExhausted { .. }
        )
    }
}

/// Result type alias for GuardError
pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_violation() {
        let err = GuardError::ConfigValidation(vec![
            "TLS must be enabled in production".to_string(),
            "Idle timeout should be at least 10 seconds".to_string(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("TLS must be enabled in production"));
        assert!(msg.contains("Idle timeout should be at least 10 seconds"));
    }

    #[test]
    fn test_exhaustion_message_and_fatality() {
        let err = GuardError::ConnectionExhausted {
            attempts: 4,
            last_error: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Database connection failed after 4 attempts: connection refused"
        );
        assert!(err.is_fatal());
        assert!(!GuardError::TransientConnection("reset".into()).is_fatal());
    }
}
