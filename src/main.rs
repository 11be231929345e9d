use anyhow::Context;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seat_booking::{config::Config, controllers, AppState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    if config.app.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(environment = %config.app.environment, store = ?config.app.store, "Starting seat booking service");

    let app_state = AppState::new(config.clone()).await?;

    // --- Start background tasks ---
    let cancel = CancellationToken::new();

    let sweeper = tokio::spawn(
        app_state
            .sweeper
            .clone()
            .run(config.scheduler.sweep_interval(), cancel.clone()),
    );
    let locker = tokio::spawn(
        app_state
            .locker
            .clone()
            .run(config.scheduler.lock_interval(), cancel.clone()),
    );

    // --- Start the web server ---
    let app = Router::new()
        .route("/", get(|| async { "Seat booking API v1.0" }))
        .nest("/api", controllers::routes())
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let host: std::net::IpAddr = config
        .app
        .host
        .parse()
        .with_context(|| format!("invalid HOST '{}'", config.app.host))?;
    let addr = SocketAddr::from((host, config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let shutdown = cancel.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    cancel.cancel();
    let _ = tokio::join!(sweeper, locker);
    info!("Background jobs stopped");
    Ok(())
}
