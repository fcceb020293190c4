use std::{str::FromStr, sync::Arc};

use axum::{Router, routing::get};
use quickroom::{AppState, config::Config, db, rooms, sync::SubscriptionHub};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower_http::cors::CorsLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("quickroom=debug,info")),
        )
        .init();

    let config = Arc::new(Config::from_env());

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true))
        .await?;
    db::init(&pool).await?;

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(12)));

    let state = AppState {
        pool,
        hub: SubscriptionHub::new(),
        config: config.clone(),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .nest("/r", rooms::router())
        .with_state(state)
        .layer(session_layer)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, namespace = %config.namespace, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}
