//! combatd - realtime combat coordination daemon
//!
//! Runs turn-based TTRPG combats in memory, authorizes every mutation
//! against session facilitators and character owners, and pushes updates
//! to each session's WebSocket room.

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod combat;
pub mod config;
pub mod db;
pub mod directory;
pub mod permissions;
pub mod rooms;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use api::AppState;
use combat::{DiceRoller, RandomRoller};
use db::Database;

pub use config::{Config, RealtimeConfig};

/// The combatd server instance
pub struct Server {
    config: Config,
    db: Arc<Database>,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a new server instance
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_roller(config, Arc::new(RandomRoller)).await
    }

    /// Create a server whose dice come from `roller`
    pub async fn with_roller(config: Config, roller: Arc<dyn DiceRoller>) -> Result<Self> {
        let db = Arc::new(Database::new(config.db_path.as_deref()).await?);
        let state = AppState::new(db.clone(), &config, roller);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            db,
            state,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the database handle
    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// Build the router
    fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    /// Run the server until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "combatd listening");

        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        info!("combatd shutdown complete");
        Ok(())
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
