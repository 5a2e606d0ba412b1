use anyhow::Context;
use clap::Parser;
use dbguard::adapters::PostgresStore;
use dbguard::alert::ChannelRegistry;
use dbguard::bootstrap;
use dbguard::cli::{Cli, Commands};
use dbguard::config::{AppConfig, LoggingConfig};
use dbguard::coordination::{install_signal_handlers, GracefulShutdown};
use dbguard::services::HealthServer;
use dbguard::supervisor::{ConnectionSupervisor, RetryPolicy};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match AppConfig::load_validated(&cli.config_dir) {
        Ok(config) => config,
        Err(e) => {
            init_logging_simple();
            error!("{}", e);
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            init_logging_simple();
            println!("{}", config.summary());
            println!("Configuration is valid");
        }
        Commands::Probe => {
            init_logging_simple();
            probe(&config).await?;
        }
        Commands::Run => {
            let _guard = init_logging(&config.logging);
            run(config).await?;
        }
    }

    Ok(())
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("Configuration loaded\n{}", config.summary());

    let store = PostgresStore::from_config(&config.database)?;
    let registry = ChannelRegistry::from_config(&config.alerts)?;
    info!("Alert channels configured: {:?}", registry.configured());

    let service = bootstrap::start(&config, store, registry)
        .await
        .context("Application failed to start")?;

    let shutdown = Arc::new(GracefulShutdown::with_defaults());
    install_signal_handlers(shutdown.clone());

    let server = HealthServer::new(Arc::new(service.health_state()), config.port);
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server
            .run(async move { server_shutdown.wait_for_request().await })
            .await
        {
            error!("{}", e);
        }
    });

    shutdown.wait_for_request().await;
    service.shutdown(&shutdown).await?;

    if let Err(e) = server_task.await {
        warn!("Health server task ended abnormally: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Connect once, ping, report and release
async fn probe(config: &AppConfig) -> anyhow::Result<()> {
    let store = PostgresStore::from_config(&config.database)?;
    let supervisor = ConnectionSupervisor::new(store, RetryPolicy::from(&config.database));

    let result = async {
        supervisor.connect().await?;
        supervisor.probe().await
    }
    .await;
    supervisor.shutdown().await;

    let latency = result.context("Database probe failed")?;
    println!(
        "Database {} reachable ({:.1}ms)",
        config.database.db_name,
        latency.as_secs_f64() * 1000.0
    );
    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", logging.level)));

    let (file_layer, guard) = match logging.directory {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dbguard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = logging.json.then(|| fmt::layer().json().with_target(true));
    let text_layer = (!logging.json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    guard
}

fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
