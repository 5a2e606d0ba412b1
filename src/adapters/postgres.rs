use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::supervisor::DataStore;

const APPLICATION_NAME: &str = "dbguard";

/// PostgreSQL driver managed by the connection supervisor
#[derive(Clone)]
pub struct PostgresStore {
    options: PgConnectOptions,
    pool: PoolSettings,
}

#[derive(Debug, Clone)]
struct PoolSettings {
    min: u32,
    max: u32,
    idle_timeout: Duration,
    acquire_timeout: Duration,
}

impl PostgresStore {
    /// Build connect options from configuration. No I/O happens here.
    pub fn from_config(db: &DatabaseConfig) -> Result<Self> {
        let mut options = PgConnectOptions::from_str(&db.url)?
            .database(&db.db_name)
            .username(&db.auth.username)
            .password(&db.auth.password)
            .application_name(APPLICATION_NAME)
            .options([(
                "statement_timeout",
                db.socket_timeout().as_millis().to_string(),
            )]);

        options = if db.tls.enabled {
            match db.tls.ca_file {
                Some(ref ca) => options.ssl_mode(PgSslMode::VerifyFull).ssl_root_cert(ca),
                None => options.ssl_mode(PgSslMode::Require),
            }
        } else {
            options.ssl_mode(PgSslMode::Prefer)
        };

        debug!(
            "PostgreSQL options prepared (auth {}, tls {})",
            db.auth.mechanism.as_str(),
            db.tls.enabled
        );

        Ok(Self {
            options,
            pool: PoolSettings {
                min: db.pool.min,
                max: db.pool.max,
                idle_timeout: db.idle_timeout(),
                acquire_timeout: db.connect_timeout(),
            },
        })
    }
}

#[async_trait]
impl DataStore for PostgresStore {
    type Handle = PgPool;

    #[instrument(skip(self))]
    async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .min_connections(self.pool.min)
            .max_connections(self.pool.max)
            .idle_timeout(Some(self.pool.idle_timeout))
            .acquire_timeout(self.pool.acquire_timeout)
            .connect_with(self.options.clone())
            .await?;

        info!("Connected to PostgreSQL");
        Ok(pool)
    }

    async fn ping(&self, pool: &PgPool) -> Result<Duration> {
        let started = Instant::now();
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(started.elapsed())
    }

    async fn close(&self, pool: PgPool) {
        pool.close().await;
        debug!("PostgreSQL pool closed");
    }
}
