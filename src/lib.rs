//! Realtime collaboration service for markdown notes.

pub mod auth;
pub mod config;
pub mod db;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod ws;

use std::sync::Arc;

use auth::IdentityProvider;
use ws::Coordinator;

/// Shared state of the HTTP and websocket handlers
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub identity: IdentityProvider,
}
