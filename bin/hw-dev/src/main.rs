//! Hookwire Development Server
//!
//! All-in-one binary for local development containing:
//! - Webhook store (in-memory seeded from config, or PostgreSQL)
//! - Listener registry bootstrapped from published webhooks
//! - In-memory delivery queue with a dispatcher worker
//! - HTTP API for publishing occurrences and inspecting webhooks

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use hw_common::WebhookConfig;
use hw_config::{HookwireConfig, StoreBackend};
use hw_dispatcher::{Dispatcher, DispatcherConfig};
use hw_events::{ListenerRegistry, NoOrderDetails, Occurrence, PublishReport, DELIVER_TASK};
use hw_queue::{MemoryDeliveryQueue, QueueWorker};
use hw_store::{MemoryWebhookStore, RegistryReader, StoredWebhook, WebhookStore};

/// Hookwire Development Server
#[derive(Parser, Debug)]
#[command(name = "hw-dev")]
#[command(about = "Hookwire development server - registry, queue and dispatcher in one binary")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env = "HW_CONFIG")]
    config: Option<PathBuf>,

    /// API server port
    #[arg(long, env = "HW_API_PORT", default_value = "8090")]
    api_port: u16,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<ListenerRegistry>,
    reader: RegistryReader,
    dispatcher: Arc<Dispatcher>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = HookwireConfig::load(args.config.as_deref())?;

    hw_common::logging::init(&config.logging.filter, config.logging.json);

    info!("Starting Hookwire Dev Server");
    info!(
        api_port = args.api_port,
        queue = %config.queue.name,
        concurrency = config.queue.concurrency,
        "Configuration loaded"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // 1. Webhook store and registry reader
    let store = create_store(&config).await?;
    let reader = RegistryReader::new(store);

    // 2. Delivery queue
    let queue = Arc::new(MemoryDeliveryQueue::new());
    let receiver = queue
        .take_receiver(&config.queue.name)
        .ok_or_else(|| anyhow::anyhow!("Queue {} already has a consumer", config.queue.name))?;

    // 3. Listener registry, bound once at startup
    let registry = ListenerRegistry::bootstrap(
        &reader,
        queue.clone(),
        config.queue.name.clone(),
        Arc::new(NoOrderDetails),
    )
    .await?;
    let registry = Arc::new(registry);

    // 4. Dispatcher worker
    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig::from_settings(&config.dispatcher)?,
        reader.clone(),
    )?);
    let worker = QueueWorker::new(config.queue.name.clone(), config.queue.concurrency)
        .register(DELIVER_TASK, dispatcher.clone());
    let worker_handle = tokio::spawn(worker.run(receiver, shutdown_tx.subscribe()));

    // 5. API server
    let state = AppState {
        registry,
        reader,
        dispatcher,
    };
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/webhooks", get(list_webhooks_handler))
        .route("/webhooks/:id/ping", post(ping_handler))
        .route("/occurrences", post(publish_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let api_addr = format!("0.0.0.0:{}", args.api_port);
    info!("API server listening on http://{}", api_addr);

    let listener = TcpListener::bind(&api_addr).await?;
    let api_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let server = axum::serve(listener, app);
            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!("API server error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("API server shutting down");
                }
            }
        })
    };

    info!("Hookwire Dev Server started successfully");
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    let _ = shutdown_tx.send(());

    // In-flight deliveries may take up to the request timeout
    let shutdown_timeout = Duration::from_secs(config.dispatcher.timeout_secs + 5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = api_handle.await;
        let _ = worker_handle.await;
    })
    .await;

    info!("Hookwire Dev Server shutdown complete");
    Ok(())
}

async fn create_store(config: &HookwireConfig) -> Result<Arc<dyn WebhookStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = MemoryWebhookStore::new();
            for seed in &config.webhooks {
                store.upsert(StoredWebhook::from_seed(seed.clone())?);
            }
            info!(webhooks = config.webhooks.len(), "Webhook store using memory");
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres => {
            let url = config
                .store
                .url
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("HW_STORE_URL required for postgres"))?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await?;
            let store = hw_store::postgres::PostgresWebhookStore::new(pool);
            store.init_schema().await?;
            for seed in &config.webhooks {
                store.upsert(&StoredWebhook::from_seed(seed.clone())?).await?;
            }
            info!("Webhook store using PostgreSQL");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreBackend::Postgres => Err(anyhow::anyhow!(
            "PostgreSQL store requested but hw-dev was built without the postgres feature"
        )),
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
        "queue": state.registry.queue_name(),
        "queue_backend": state.registry.queue_backend(),
        "catalog_version": hw_common::CATALOG_VERSION,
    }))
}

/// Published webhooks as currently stored. Secrets are never serialized.
async fn list_webhooks_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<WebhookConfig>>, (StatusCode, String)> {
    state
        .reader
        .load_published()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn publish_handler(State(state): State<AppState>, Json(occurrence): Json<Occurrence>) -> Json<PublishReport> {
    Json(state.registry.publish(&occurrence).await)
}

async fn ping_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let webhook = state
        .reader
        .find(&id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Webhook {} not found", id)))?;

    match state.dispatcher.ping(&webhook).await {
        Ok(status) => Ok(Json(serde_json::json!({ "webhook_id": id, "status": status }))),
        Err(e) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
