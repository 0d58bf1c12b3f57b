use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evently::{config::Config, controllers, services::cleanup::CleanupService, AppState};

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.app.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    info!("Starting Evently booking API");

    let app_state = Arc::new(
        AppState::new(config.clone())
            .await
            .expect("Failed to initialize application state"),
    );

    app_state
        .db
        .run_migrations()
        .await
        .expect("Failed to run database migrations");

    // Фоновый reaper: протухшие брони, очередь, осиротевшие блокировки
    let cleanup = CleanupService::new(app_state.clone());
    let reaper_interval = Duration::from_secs(config.booking.reaper_interval_secs);
    tokio::spawn(cleanup.run_periodic(reaper_interval));

    let app = Router::new()
        .route("/", get(root_handler))
        .nest("/api", controllers::routes())
        .with_state(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    info!("Server listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    info!("Server exiting");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Shutting down server...");
}

// Простейший handler
async fn root_handler() -> &'static str {
    "Evently API v1.0"
}
