//! Warden server - ledger simulator for quorum and timelock executors

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warden::config::ServerConfig;
use warden::ledger::Ledger;
use warden::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();

    let ledger = if config.simulated_clock {
        Ledger::simulated(config.event_capacity)
    } else {
        Ledger::system(config.event_capacity)
    };
    tracing::info!(simulated_clock = ledger.is_simulated(), "ledger ready");

    let state = AppState::new(ledger);

    // Build router
    let app = warden::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
