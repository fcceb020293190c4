pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod rooms;
pub mod session;
pub mod sync;

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;

pub use error::{AppError, AppResult, ChatError};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub pool: SqlitePool,
    pub hub: sync::SubscriptionHub,
    pub config: Arc<config::Config>,
}
