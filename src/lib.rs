//! Timed live poll / trivia / survey sessions with an offline-resilient
//! participation pipeline.
//!
//! The server half (axum + sqlx) exposes poll lookup, status, and detail
//! reads plus the atomic submission endpoint. The [`client`] module holds
//! the attendee-side pipeline: a versioned resource cache, a durable vote
//! queue that survives restarts, a connectivity-driven sync trigger, and the
//! per-tab session state machine that races the poll deadline.

use std::net::SocketAddr;
use std::time::Duration;

use http::{header::CONTENT_TYPE, Method};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod votes;

use config::Config;

pub async fn start_server() {
    dotenvy::dotenv().ok();
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::load();

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to the database");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    let app = routes::create_routes(pool).layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("listening on {addr}");

    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .expect("server error");

    info!("server shut down");
}

async fn shutdown_signal(handle: axum_server::Handle) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
