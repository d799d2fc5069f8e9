//! Warden - quorum and timelock gated control of protected resources

pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod governance;
pub mod identity;
pub mod ledger;
pub mod resource;
pub mod websocket;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::identity::Identity;
use crate::ledger::{ExecutorSnapshot, Ledger};
use crate::resource::ResourceSnapshot;

/// Application state shared across handlers
pub struct AppState {
    /// Every ledger operation runs under this lock, one at a time
    pub ledger: RwLock<Ledger>,
}

impl AppState {
    pub fn new(ledger: Ledger) -> Arc<Self> {
        Arc::new(Self {
            ledger: RwLock::new(ledger),
        })
    }
}

/// Routes served by the ledger service, without transport layers
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket::handler))
        .route("/executors/:id", get(get_executor))
        .route("/resources/:id", get(get_resource))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn get_executor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Identity>,
) -> error::Result<Json<ExecutorSnapshot>> {
    let ledger = state.ledger.read().await;
    Ok(Json(ledger.executor_snapshot(id)?))
}

async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Identity>,
) -> error::Result<Json<ResourceSnapshot>> {
    let ledger = state.ledger.read().await;
    Ok(Json(ledger.resource_snapshot(id)?))
}
