use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use log_ingest::broker::{MemoryBroker, PubSubPublisher, Publisher};
use log_ingest::config::{AppConfig, Role};
use log_ingest::gateway::{Gateway, gateway_routes};
use log_ingest::store::{LibSqlRecordStore, RecordStore};
use log_ingest::worker::{Worker, push_routes, record_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    eprintln!("📥 Log Ingest v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Role: {}", config.role);
    eprintln!("   Listening: http://{}", config.server.bind_addr());

    // Dropped at the end of main, after the server has drained.
    let mut memory_broker: Option<Arc<MemoryBroker>> = None;

    let app: Router = match config.role {
        Role::Gateway => {
            let pubsub = config
                .pubsub
                .clone()
                .context("GCP_PROJECT_ID is required for the gateway role")?;
            eprintln!("   Topic: {}", pubsub.topic_path());
            if let Some(host) = &pubsub.emulator_host {
                eprintln!("   Pub/Sub emulator: {host}");
            }
            let publisher: Arc<dyn Publisher> =
                Arc::new(PubSubPublisher::new(pubsub).context("Failed to build Pub/Sub client")?);
            gateway_routes(Arc::new(Gateway::new(publisher)))
        }
        Role::Worker => {
            let store = open_store(&config).await?;
            let worker = Arc::new(Worker::new(Arc::clone(&store), config.delay));
            push_routes(worker).merge(record_routes(store))
        }
        Role::Standalone => {
            let store = open_store(&config).await?;
            let worker = Arc::new(Worker::new(Arc::clone(&store), config.delay));

            let broker = MemoryBroker::new(config.broker);
            broker
                .spawn_dispatcher(worker)
                .context("Memory broker dispatcher already running")?;
            eprintln!(
                "   Broker: in-memory (ack deadline {}s)",
                broker.ack_deadline().as_secs()
            );

            let publisher: Arc<dyn Publisher> = broker.clone();
            memory_broker = Some(broker);
            gateway_routes(Arc::new(Gateway::new(publisher))).merge(record_routes(store))
        }
    };

    let app = app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr()))?;
    tracing::info!(addr = %config.server.bind_addr(), role = %config.role, "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(broker) = memory_broker {
        let stats = broker.stats();
        broker.close();
        tracing::info!(
            published = stats.published,
            acked = stats.acked,
            redelivered = stats.redelivered,
            "Memory broker closed"
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn RecordStore>> {
    let store = LibSqlRecordStore::from_config(&config.store)
        .await
        .with_context(|| format!("Failed to open record store at {}", config.store.db_path.display()))?;
    eprintln!("   Database: {}", config.store.db_path.display());
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
