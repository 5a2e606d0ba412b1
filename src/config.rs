use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::{Host, Url};

use crate::alert::ChannelKind;
use crate::error::{GuardError, Result};

/// Environment variable selecting the deployment environment
pub const ENV_SELECTOR: &str = "DBGUARD_ENV";

/// Prefix for configuration overrides (`DBGUARD__DATABASE__URL`, ...)
pub const ENV_PREFIX: &str = "DBGUARD";

const DEV_DB_NAME: &str = "myapp_dev";
const DEV_USERNAME: &str = "dev_user";
const DEV_PASSWORD: &str = "dev_pass";
const WEAK_PASSWORDS: &[&str] = &["password", "123456", "admin"];
const MIN_IDLE_TIMEOUT_MS: u64 = 10_000;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Example,
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Example => "example",
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Read the environment from `DBGUARD_ENV`.
    ///
    /// Unset means development; an unrecognized value is an error rather
    /// than a silent fallback to development defaults.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_selector(std::env::var(ENV_SELECTOR).ok().as_deref())
    }

    fn from_selector(raw: Option<&str>) -> std::result::Result<Self, ConfigError> {
        match raw {
            None => Ok(Self::default()),
            Some(raw) => raw
                .parse()
                .map_err(|e| ConfigError::Message(format!("{ENV_SELECTOR}: {e}"))),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "example" => Ok(Self::Example),
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Health server port
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthMechanism {
    #[default]
    #[serde(rename = "scram-sha-256")]
    ScramSha256,
    #[serde(rename = "md5")]
    Md5,
}

impl AuthMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMechanism::ScramSha256 => "SCRAM-SHA-256",
            AuthMechanism::Md5 => "MD5",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub mechanism: AuthMechanism,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// CA bundle used to verify the server certificate
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub min: u32,
    pub max: u32,
    pub idle_timeout_ms: u64,
}

/// Connection parameters for the data store
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL endpoint, e.g. `postgres://db.internal:5432`
    pub url: String,
    pub db_name: String,
    pub auth: AuthConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    pub pool: PoolConfig,
    pub connect_timeout_ms: u64,
    /// Upper bound for a single statement
    pub socket_timeout_ms: u64,
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub retry_delay_ms: u64,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.pool.idle_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// True when the endpoint resolves to this machine
    pub fn is_loopback(&self) -> bool {
        match Url::parse(&self.url) {
            Ok(url) => match url.host() {
                // Non-special schemes such as postgres:// keep IP literals as domains
                Some(Host::Domain(domain)) => {
                    if let Ok(ip) = domain
                        .trim_start_matches('[')
                        .trim_end_matches(']')
                        .parse::<IpAddr>()
                    {
                        return ip.is_loopback();
                    }
                    domain.eq_ignore_ascii_case("localhost")
                        || domain.to_ascii_lowercase().ends_with(".localhost")
                }
                Some(Host::Ipv4(ip)) => ip.is_loopback(),
                Some(Host::Ipv6(ip)) => ip.is_loopback(),
                None => false,
            },
            Err(_) => self.url.contains("localhost"),
        }
    }
}

/// Health monitor schedule
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub interval_ms: u64,
}

fn default_monitor_interval() -> u64 {
    5000
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_monitor_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackSettings {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmsSettings {
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub url: Option<String>,
}

/// Alert channel credentials and dispatch policy
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub email: EmailSettings,
    #[serde(default)]
    pub slack: SlackSettings,
    #[serde(default)]
    pub sms: SmsSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
    /// Channels that receive recovery notices
    #[serde(default = "default_recovery_channels")]
    pub recovery_channels: Vec<ChannelKind>,
    /// Window for dropping identical alerts; 0 disables suppression
    #[serde(default)]
    pub suppress_duplicates_secs: u64,
    /// Per-channel delivery deadline
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_ms: u64,
}

fn default_recovery_channels() -> Vec<ChannelKind> {
    vec![ChannelKind::Slack]
}

fn default_delivery_timeout() -> u64 {
    10_000
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            email: EmailSettings::default(),
            slack: SlackSettings::default(),
            sms: SmsSettings::default(),
            webhook: WebhookSettings::default(),
            recovery_channels: default_recovery_channels(),
            suppress_duplicates_secs: 0,
            delivery_timeout_ms: default_delivery_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Write daily-rotated log files into this directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        Self::load_for(config_dir, Environment::from_env()?)
    }

    /// Load configuration for an explicit environment.
    ///
    /// Development-style environments get working local defaults; production
    /// gets none for the endpoint and credentials, so a missing value fails
    /// deserialization instead of silently pointing at a dev database.
    pub fn load_for<P: AsRef<Path>>(
        config_dir: P,
        environment: Environment,
    ) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let production = environment.is_production();

        let mut builder = Config::builder()
            .set_default("environment", environment.as_str())?
            .set_default("port", 3000)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("monitor.interval_ms", 5000)?
            .set_default("database.auth.mechanism", "scram-sha-256")?
            .set_default("database.tls.enabled", production)?
            .set_default("database.pool.min", if production { 10 } else { 5 })?
            .set_default("database.pool.max", if production { 50 } else { 30 })?
            .set_default(
                "database.pool.idle_timeout_ms",
                if production { 60_000 } else { 30_000 },
            )?
            .set_default("database.connect_timeout_ms", 5000)?
            .set_default("database.socket_timeout_ms", 30_000)?
            .set_default("database.max_retries", 3)?
            .set_default("database.retry_delay_ms", 1000)?;

        if production {
            builder = builder.set_default("database.tls.ca_file", "/etc/ssl/certs/ca.pem")?;
        } else {
            builder = builder
                .set_default("database.url", "postgres://localhost:5432")?
                .set_default("database.db_name", DEV_DB_NAME)?
                .set_default("database.auth.username", DEV_USERNAME)?
                .set_default("database.auth.password", DEV_PASSWORD)?;
        }

        let builder = builder
            // Load default config file
            .add_source(File::from(config_dir.join("default")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(File::from(config_dir.join(environment.as_str())).required(false))
            // Override with environment variables (DBGUARD__DATABASE__URL, etc.)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("alerts.email.to")
                    .with_list_parse_key("alerts.sms.to")
                    .with_list_parse_key("alerts.recovery_channels"),
            );

        builder.build()?.try_deserialize()
    }

    /// Load and validate; either failure is fatal at startup
    pub fn load_validated<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config = Self::load_from(config_dir)?;
        config.validate().map_err(GuardError::ConfigValidation)?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }

    /// Validate cross-field rules, collecting every violation
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let db = &self.database;

        if self.is_production() {
            if db.db_name == DEV_DB_NAME {
                errors.push("Production database name cannot use development default".to_string());
            }
            if db.is_loopback() {
                errors.push("Production database URL cannot point to a loopback address".to_string());
            }
            if !db.tls.enabled {
                errors.push("TLS must be enabled in production".to_string());
            }
            if db.auth.username == DEV_USERNAME {
                errors.push("Production username cannot use development default".to_string());
            }
        }

        if db.pool.min > db.pool.max {
            errors.push(format!(
                "Connection pool min ({}) cannot exceed max ({})",
                db.pool.min, db.pool.max
            ));
        }

        if db.pool.idle_timeout_ms < MIN_IDLE_TIMEOUT_MS {
            errors.push("Idle timeout should be at least 10 seconds".to_string());
        }

        if db.auth.username.is_empty() {
            errors.push("Database username is required".to_string());
        }

        if WEAK_PASSWORDS.contains(&db.auth.password.as_str()) {
            errors.push("Password does not meet security requirements".to_string());
        }

        match Url::parse(&db.url) {
            Ok(url) if matches!(url.scheme(), "postgres" | "postgresql") => {}
            Ok(url) => errors.push(format!(
                "Invalid database connection scheme '{}'",
                url.scheme()
            )),
            Err(e) => errors.push(format!("Invalid database URL: {e}")),
        }

        if db.tls.enabled {
            if let Some(ref ca_file) = db.tls.ca_file {
                match std::fs::metadata(ca_file) {
                    Ok(meta) if meta.is_file() => {}
                    Ok(_) => errors.push(format!(
                        "TLS CA file validation failed: {} is not a file",
                        ca_file.display()
                    )),
                    Err(e) => errors.push(format!(
                        "TLS CA file validation failed: {}: {e}",
                        ca_file.display()
                    )),
                }
            }
        }

        if self.alerts.recovery_channels.is_empty() {
            errors.push("At least one recovery alert channel is required".to_string());
        }

        if self.monitor.interval_ms == 0 {
            errors.push("Monitor interval must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Human-readable summary with secrets left out
    pub fn summary(&self) -> String {
        let db = &self.database;
        let url = match Url::parse(&db.url) {
            Ok(mut url) => {
                let _ = url.set_password(None);
                url.to_string()
            }
            Err(_) => "<invalid>".to_string(),
        };
        format!(
            "Application Configuration:\n  \
             Environment: {}\n  \
             Port: {}\n  \
             Database:\n    \
             URL: {}\n    \
             Name: {}\n    \
             Auth: {} ({})\n    \
             TLS: {}\n    \
             Pool: {}..{} (idle {}ms)\n    \
             Retries: {} x {}ms\n  \
             Monitor interval: {}ms\n  \
             Recovery channels: {}",
            self.environment,
            self.port,
            url,
            db.db_name,
            db.auth.mechanism.as_str(),
            db.auth.username,
            if db.tls.enabled { "Enabled" } else { "Disabled" },
            db.pool.min,
            db.pool.max,
            db.pool.idle_timeout_ms,
            db.max_retries,
            db.retry_delay_ms,
            self.monitor.interval_ms,
            self.alerts
                .recovery_channels
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}
