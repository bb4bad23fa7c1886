use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use presence_hub::config::Config;
use presence_hub::db::kv::{KeyValueStore, MemoryStore, RedisStore};
use presence_hub::gateway::hub::HubHandle;
use presence_hub::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // Credentials are issued elsewhere; in-memory only makes sense for local runs.
    let kv: Arc<dyn KeyValueStore> = match config.redis_url.as_deref() {
        Some(url) => match RedisStore::connect(url).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                tracing::error!(%err, "failed to connect to redis");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("REDIS_URL not set; using in-memory credential store");
            Arc::new(MemoryStore::new())
        }
    };

    // History is memory-only; no transcript sink is wired.
    let hub = HubHandle::spawn(&config, None);

    tracing::info!(
        queue_capacity = config.outbound_queue_capacity,
        history_capacity = config.history_capacity,
        "presence-hub configured"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(presence_hub::routes::router(&config))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            kv,
            config: Arc::new(config),
            hub,
        });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "presence-hub listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, "failed to bind");
            std::process::exit(1);
        }
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(%err, "server error");
    }
}
