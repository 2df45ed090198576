//! Salon Queue Server
//!
//! REST + WebSocket API server for virtual salon queues.

use anyhow::Context;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use salon_queue_server::{
    api,
    config::{AppConfig, StoreBackend},
    repository::{memory::MemoryStore, QueueStore, Repository},
    services::{
        broadcast::Gateway,
        clock::SystemClock,
        email::EmailService,
        notifications::{NoopNotifier, NotificationDispatcher, Notifier},
        redis::RedisNotifier,
        sweeper::Scheduler,
        Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("salon_queue_server={},tower_http=debug", config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Salon Queue Server v{}", env!("CARGO_PKG_VERSION"));

    let store = connect_store(&config).await?;
    let notifier = build_notifier(&config).await;

    let server_host = config.server.host.clone();
    let server_port = config.server.port;

    let services = Services::new(store, Arc::new(SystemClock), notifier, &config);

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::start(
        services.sweeper.clone(),
        services.gateway.clone(),
        cancel.clone(),
    );
    let gateway = services.gateway.clone();

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = create_router(state);

    let addr = SocketAddr::new(
        server_host.parse().context("Invalid host address")?,
        server_port,
    );

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(gateway))
        .await?;

    scheduler.shutdown().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn QueueStore>> {
    match config.store.backend {
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .connect(&config.database.url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Connected to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;

            tracing::info!("Database migrations completed");
            Ok(Arc::new(Repository::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store with demo data; nothing is persisted");
            Ok(Arc::new(MemoryStore::with_demo_data().await))
        }
    }
}

/// Redis push queue when enabled and reachable, otherwise notifications are dropped
async fn build_notifier(config: &AppConfig) -> NotificationDispatcher {
    let push: Arc<dyn Notifier> = if config.redis.enabled {
        match RedisNotifier::new(&config.redis.url, &config.redis.queue_key).await {
            Ok(notifier) => {
                tracing::info!("Connected to Redis");
                Arc::new(notifier)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, push notifications disabled");
                Arc::new(NoopNotifier)
            }
        }
    } else {
        Arc::new(NoopNotifier)
    };

    let email = config
        .email
        .enabled
        .then(|| EmailService::new(config.email.clone()));

    NotificationDispatcher::new(push, email)
}

/// Resolve on Ctrl-C, closing live sockets so the server can drain
async fn shutdown_signal(gateway: Arc<Gateway>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested");
    gateway.shutdown_all().await;
}

/// Create the application router with all routes
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Salons
        .route("/salons/:id/queue", post(api::queue::join_queue))
        .route("/salons/:id/queue", get(api::queue::salon_queue))
        .route("/salons/:id/viewers", get(api::queue::salon_viewers))
        // Queue entries
        .route("/queue/me", get(api::queue::my_entries))
        .route("/queue/:id/status", put(api::queue::update_status))
        .route("/queue/:id/check-in", post(api::queue::check_in))
        .route("/queue/:id/verify", post(api::queue::verify_arrival))
        .route("/queue/:id", delete(api::queue::leave_queue))
        // Live updates
        .route("/ws", get(api::ws::ws_handler))
        .with_state(state);

    // OpenAPI documentation
    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
}
