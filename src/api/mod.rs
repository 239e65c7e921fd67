//! HTTP API module - REST endpoints and WebSocket

mod auth;
mod combat;
pub mod error;
mod websocket;

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::accounts::AccountService;
use crate::broadcast::BroadcastDispatcher;
use crate::combat::{CombatEngine, CombatStore, DiceRoller};
use crate::config::{Config, RealtimeConfig};
use crate::db::Database;
use crate::directory::{IdentityVerifier, SqliteDirectory};
use crate::permissions::CombatGate;
use crate::rooms::RoomRegistry;
use crate::session::CombatService;

pub use combat::{EffectResponse, EndCombatResponse, NextTurnResponse};
pub use error::{ApiError, Caller, JsonBody};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub accounts: AccountService,
    pub identity: Arc<dyn IdentityVerifier>,
    pub combat: Arc<CombatService>,
    pub rooms: Arc<RoomRegistry>,
    pub realtime: RealtimeConfig,
}

impl AppState {
    /// Wire every component over one database
    pub fn new(db: Arc<Database>, config: &Config, roller: Arc<dyn DiceRoller>) -> Self {
        let accounts = AccountService::new(db.pool().clone());
        let directory = Arc::new(SqliteDirectory::new(db.pool().clone()));

        let rooms = Arc::new(RoomRegistry::new(config.realtime.slow_consumer_limit));
        let engine = Arc::new(CombatEngine::new(Arc::new(CombatStore::new()), roller));
        let combat = Arc::new(CombatService::new(
            engine,
            CombatGate::new(directory.clone(), directory.clone()),
            BroadcastDispatcher::new(rooms.clone()),
            directory,
        ));

        Self {
            db,
            identity: Arc::new(accounts.clone()),
            accounts,
            combat,
            rooms,
            realtime: config.realtime,
        }
    }
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
        .route("/ws", get(websocket::ws_handler))
        .merge(auth::router())
        .merge(combat::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Root endpoint
async fn root() -> impl IntoResponse {
    Json(RootResponse {
        name: "combatd",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let combats = state.combat.engine().store().len().await;
    let rooms = state.rooms.room_count();
    match state.db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                database: "ok",
                combats,
                rooms,
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                database: "error",
                combats,
                rooms,
            }),
        ),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    combats: usize,
    rooms: usize,
}
