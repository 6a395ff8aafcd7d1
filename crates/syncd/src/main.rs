//! Daemon entry point.

use std::sync::Arc;

use common::StoreId;
use domain::Store;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderRepository, OrderRepository, PostgresOrderRepository};
use sqlx::postgres::PgPoolOptions;
use sync::{
    ConnectorRegistry, InMemoryConnector, InMemoryConnectorFactory, ShopifyConnectorFactory,
    SyncOrchestrator,
};
use syncd::config::{Config, LogFormat};
use syncd::{AppState, CycleRunner};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn run<R: OrderRepository + 'static>(
    config: Config,
    repo: R,
    registry: ConnectorRegistry,
    source_store_id: StoreId,
    metrics_handle: PrometheusHandle,
) {
    let orchestrator = SyncOrchestrator::new(
        repo,
        Arc::new(registry),
        config.sync_config(source_store_id),
    );
    let runner = Arc::new(CycleRunner::new(orchestrator));

    if config.run_once {
        match runner.run().await {
            Ok(report) => tracing::info!(
                report = %serde_json::to_string(&report).unwrap_or_default(),
                "single cycle finished"
            ),
            Err(e) => {
                tracing::error!(error = %e, "single cycle failed");
                std::process::exit(1);
            }
        }
        return;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(syncd::run_schedule(
        Arc::clone(&runner),
        config.poll_interval,
        shutdown_rx,
    ));

    let state = Arc::new(AppState { runner });
    let app = syncd::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, poll_interval_secs = config.poll_interval.as_secs(), "starting sync daemon");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await
        .expect("server error");

    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "scheduler task failed");
    }
    tracing::info!("daemon shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env().expect("invalid configuration");
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Register connectors
    let registry = ConnectorRegistry::new()
        .register("shopify", ShopifyConnectorFactory::new(config.connector_timeout));

    // 4. Pick the repository and start
    match (config.database_url.clone(), config.source_store_id) {
        (Some(url), Some(source_store_id)) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let repo = PostgresOrderRepository::new(pool);
            repo.run_migrations().await.expect("migrations failed");
            run(config, repo, registry, source_store_id, metrics_handle).await;
        }
        _ => {
            tracing::warn!("DATABASE_URL not set; using an in-memory repository");
            let repo = InMemoryOrderRepository::new();
            let source = Store::source("Local Source", "memory");
            repo.save_store(source.clone())
                .await
                .expect("failed to seed source store");

            let factory = InMemoryConnectorFactory::new();
            factory.insert(source.id, InMemoryConnector::new());
            let registry = registry.register("memory", factory);
            run(config, repo, registry, source.id, metrics_handle).await;
        }
    }
}
