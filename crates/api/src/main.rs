//! Orders service entry point: storage, cache warm-up, ingestion and HTTP.

use std::process::ExitCode;
use std::sync::Arc;

use api::config::LogFormat;
use api::{AppState, Config};
use domain::{AggregateValidator, OrderService};
use ingest::{Consumer, KafkaSource};
use order_store::PgAggregateStore;
use retry::CancellationToken;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Load configuration, then initialize tracing from it
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            init_tracing("info", LogFormat::Text);
            tracing::error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.app.log_level, config.app.log_format);

    match run(config).await {
        Ok(()) => {
            tracing::info!("service shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "service failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Connect to PostgreSQL and apply migrations
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store = PgAggregateStore::new(pool.clone());
    store.run_migrations().await?;
    tracing::info!("database ready");

    // 4. Build the service and warm the cache
    let cache_size = config.service.cache_size;
    let service = Arc::new(OrderService::new(store, cache_size));
    let warmed = service.load_recent(cache_size).await?;
    tracing::info!(count = warmed, "cache warmed");

    // 5. Start the ingestion consumer
    let source = KafkaSource::new(&config.kafka_source())?;
    let consumer = Arc::new(Consumer::new(
        source,
        Arc::clone(&service),
        config.retrier(),
        AggregateValidator::new(),
    ));
    let cancel = CancellationToken::new();
    let consumer_task = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        let cancel = cancel.clone();
        async move { consumer.run(&cancel).await }
    });

    // 6. Build the application
    let state = Arc::new(AppState::new(
        Arc::clone(&service),
        config.retrier(),
        config.request_timeout(),
    ));
    let app = api::create_app(state, metrics_handle);

    // 7. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // 8. Stop ingestion and release resources, even if the server failed
    cancel.cancel();
    match tokio::time::timeout(config.shutdown_timeout(), consumer_task).await {
        Ok(Ok(stats)) => tracing::info!(?stats, "consumer drained"),
        Ok(Err(err)) => tracing::error!(error = %err, "consumer task panicked"),
        Err(_) => tracing::warn!("consumer did not stop within the shutdown timeout"),
    }
    if let Err(err) = consumer.close().await {
        tracing::error!(error = %err, "failed to close message source");
    }
    pool.close().await;

    served?;
    Ok(())
}
