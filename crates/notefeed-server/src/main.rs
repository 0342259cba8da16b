mod actor;
mod auth;
mod config;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method, header};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use notefeed_store::SqliteStore;

use crate::actor::FeedHandle;
use crate::config::Config;
use crate::routes::AppStateInner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notefeed=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init store and the feed thread
    let store = SqliteStore::open(&config.db_path)?;
    let feed = FeedHandle::spawn(store, config.feed)?;

    let state = Arc::new(AppStateInner {
        feed,
        jwt_secret: config.jwt_secret,
    });

    let mut app = routes::router(state);
    if let Some(origin) = &config.cors_origin {
        let cors = CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app = app.layer(cors);
        info!(origin = %origin, "CORS enabled");
    }
    let app = app.layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Notefeed listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
